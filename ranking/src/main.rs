use clap::Parser;
use log::{error, info};
use ranking::{http, RankingServiceConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ranking aggregator service", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RPC port game servers connect to
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Port for the HTTP health endpoint
    #[arg(long, default_value = "3011")]
    http_port: u16,

    /// Where score snapshots are kept
    #[arg(short, long, default_value = "data/leaderboard.json")]
    data_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = RankingServiceConfig {
        data_file: Some(args.data_file.clone()),
        ..RankingServiceConfig::default()
    };

    info!("Starting ranking service...");
    info!("Snapshots: {}", args.data_file.display());

    let handle = ranking::spawn(config, &format!("{}:{}", args.host, args.port)).await?;
    info!("Ranking RPC listening on {}", handle.addr);

    let http_addr = format!("{}:{}", args.host, args.http_port);
    tokio::select! {
        result = http::serve(&http_addr, handle.health_state()) => {
            if let Err(e) = result {
                error!("Health endpoint failed: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    handle.shutdown().await;

    Ok(())
}
