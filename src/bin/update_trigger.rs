//! Update Trigger Binary
//!
//! Asks a running price oracle to record one fresh sample. Meant for cron-like
//! schedulers, so it always exits 0 and reports failures on stdout.
//!
//! Usage:
//!   update-trigger --data-provider-api-address http://localhost:5000
//!
//! Environment:
//!   DATA_PROVIDER_API_ADDRESS - Base URL of the oracle

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "update-trigger")]
#[command(about = "Trigger one price update on a running oracle")]
struct Args {
    /// Base URL of the price oracle
    #[arg(long, env = "DATA_PROVIDER_API_ADDRESS")]
    data_provider_api_address: String,

    /// Request timeout in seconds (backfill on first call can be slow)
    #[arg(long, env = "UPDATE_TIMEOUT_SECS", default_value = "120")]
    timeout_secs: u64,
}

fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = trigger(&args) {
        println!("Request failed: {:#}", e);
    }
}

fn trigger(args: &Args) -> Result<()> {
    let url = format!(
        "{}/update",
        args.data_provider_api_address.trim_end_matches('/')
    );

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(&url)
        .send()
        .with_context(|| format!("GET {} failed", url))?;
    let status = response.status();
    let body = response.text().unwrap_or_default();

    if status.is_success() {
        println!("{}", body);
    } else {
        println!("Request failed with status code: {}", status.as_u16());
        println!("Error: {}", body);
    }
    Ok(())
}
