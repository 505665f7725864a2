use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "baton-cli")]
#[command(about = "Query a running balancer's monitoring endpoint", long_about = None)]
struct Cli {
    /// Monitoring endpoint base URL.
    #[arg(short, long, default_value = "http://localhost:8001")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full stats report: process snapshot plus per-backend counters.
    Stats,
    /// Per-backend counters only.
    Backends,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/stats", cli.url))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        eprintln!("monitoring endpoint returned {}", status);
        return Ok(());
    }

    let report: Value = response.json().await?;
    let output = match cli.command {
        Commands::Stats => &report,
        Commands::Backends => report.get("backends").unwrap_or(&Value::Null),
    };
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}
