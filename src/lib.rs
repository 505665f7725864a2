//! baton — a reverse-proxy load balancer.
//!
//! Terminates client HTTP/1.1 or HTTP/2 connections on one listening
//! socket, picks an upstream backend per request under a pluggable
//! selection policy, rewrites and forwards the request, and keeps the
//! selectable set current with a background health prober. A monitoring
//! endpoint exposes per-backend and process counters.
//!
//! ```text
//!  client ──▶ http (frontend) ──▶ balancer (Selector::pick)
//!                 │                     │
//!                 │               upstream (rewrite + forward)
//!                 │                     │ middleware before/after
//!                 ◀─────────────────────┘
//!
//!  background: health prober ──▶ mark_down / mark_up
//!  sidecar:    monitoring /stats, metrics exporter
//! ```

pub mod balancer;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod monitoring;
pub mod observability;
pub mod upstream;

pub use config::{load_config, Config};
pub use lifecycle::{AppError, Application, Shutdown};
