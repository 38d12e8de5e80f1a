use clap::{Parser, Subcommand};
use reqwest::header::HeaderMap;
use serde_json::Value;

const RATE_LIMIT_HEADERS: [&str; 4] = [
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
    "retry-after",
];

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Inspect and probe a running screenplay-gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway health
    Health,
    /// Send a burst of requests and show the rate-limit headers of each
    Probe {
        /// Path to request
        #[arg(short, long, default_value = "/")]
        path: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,

        /// Value for X-Forwarded-For, to probe a specific client's quota
        #[arg(short, long)]
        forwarded_for: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/healthz", cli.url)).send().await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: gateway returned status {}", status);
                return Ok(());
            }
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Probe { path, count, forwarded_for } => {
            for i in 1..=count {
                let mut req = client.get(format!("{}{}", cli.url, path));
                if let Some(ip) = &forwarded_for {
                    req = req.header("x-forwarded-for", ip);
                }
                let res = req.send().await?;
                println!("#{:<3} {} {}", i, res.status().as_u16(), format_headers(res.headers()));
            }
        }
    }

    Ok(())
}

fn format_headers(headers: &HeaderMap) -> String {
    RATE_LIMIT_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("{}={}", name, v))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
