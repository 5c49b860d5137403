use clap::Parser;
use log::{error, info};
use server::http::{self, StatusState};
use server::network::{Server, ServerConfig, ServerMessage};

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative game server", long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// UDP port clients connect to
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Port for the HTTP health and status endpoints
    #[arg(long, default_value = "3010")]
    http_port: u16,

    /// Address of the session service
    #[arg(long, default_value = "127.0.0.1:3002")]
    session_addr: String,

    /// Address of the ranking service
    #[arg(long, default_value = "127.0.0.1:3001")]
    ranking_addr: String,

    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "64")]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        session_addr: args.session_addr,
        ranking_addr: args.ranking_addr,
        max_clients: args.max_clients,
        ..ServerConfig::default()
    };

    info!("Starting game server...");
    info!("Session service: {}", config.session_addr);
    info!("Ranking service: {}", config.ranking_addr);

    let mut server = Server::new(config).await?;
    let handle = server.handle();

    let status_state = StatusState {
        server: handle.clone(),
    };
    let http_addr = format!("{}:{}", args.host, args.http_port);
    tokio::spawn(async move {
        if let Err(e) = http::serve(&http_addr, status_state).await {
            error!("Status endpoint failed: {}", e);
        }
    });

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            let _ = handle.send(ServerMessage::Shutdown);
        }
    }

    Ok(())
}
