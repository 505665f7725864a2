use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use baton::config::load_config;
use baton::observability::logging::init_logging;
use baton::Application;

#[derive(Parser)]
#[command(name = "baton")]
#[command(about = "Reverse-proxy load balancer", long_about = None)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load '{}': {}", cli.config.display(), err);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log);
    tracing::info!(
        config = %cli.config.display(),
        policy = %config.balancer_type,
        backends = config.backends.len(),
        "configuration loaded"
    );

    let app = match Application::build(config).await {
        Ok(app) => app,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "balancer exited with error");
            ExitCode::FAILURE
        }
    }
}
