//! Token Tracker CLI
//!
//! Local cache, aggregation and spending alerts for LLM API usage.

mod aggregation;
mod alerts;
mod cache;
mod cli;
mod commands;
mod config;
mod events;
mod ingest;
mod models;
mod poller;
mod session;
mod storage;

use tracing_subscriber::EnvFilter;


#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
