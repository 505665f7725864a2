//! HTTP frontend subsystem.
//!
//! # Data Flow
//! ```text
//! TCP (+TLS) connection
//!     → server.rs (accept loop, concurrency cap, h1/h2 detection)
//!     → proxy_handler (buffer body, Selector::pick, forward, emit)
//! ```

pub mod server;
pub mod tls;

pub use server::HttpServer;
