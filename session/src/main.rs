use clap::Parser;
use log::{error, info};
use session::{http, SessionServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Session store service", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RPC port game servers connect to
    #[arg(short, long, default_value = "3002")]
    port: u16,

    /// Port for the HTTP health endpoint
    #[arg(long, default_value = "3012")]
    http_port: u16,

    /// Where session snapshots are kept
    #[arg(short, long, default_value = "data/sessions.json")]
    data_file: PathBuf,

    /// Seconds of inactivity before a session is evicted
    #[arg(long, default_value = "600")]
    ttl_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = SessionServiceConfig {
        ttl: Duration::from_secs(args.ttl_secs),
        data_file: Some(args.data_file.clone()),
        ..SessionServiceConfig::default()
    };

    info!("Starting session service...");
    info!("Snapshots: {}", args.data_file.display());

    let handle = session::spawn(config, &format!("{}:{}", args.host, args.port)).await?;
    info!("Session RPC listening on {}", handle.addr);

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
