//! screenplay-gateway
//!
//! Rate-limiting, retrying gateway in front of the screenplay analysis app.
//!
//! ```text
//!     Client ──▶ request id ──▶ rate limit ──▶ cache ──▶ upstream client ──▶ App
//!                                (quota store)            (with_retry)
//! ```

use std::path::PathBuf;

use clap::Parser;

use screenplay_gateway::config::{load_config, load_from_env};
use screenplay_gateway::lifecycle::startup;
use screenplay_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "screenplay-gateway", version)]
#[command(about = "Rate-limiting gateway for the screenplay analysis service", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults plus environment when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "screenplay-gateway starting");

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
