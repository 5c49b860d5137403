use clap::Parser;
use client::game::ClientGameState;
use client::input::InputManager;
use client::network::NetworkHandle;
use client::rendering::{Renderer, UiConfig};
use log::{error, info};
use macroquad::prelude::*;
use macroquad::window::Conf;
use shared::{get_timestamp, Packet, PREDICTION_TICK};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3000")]
    server: String,

    /// Player name; the server picks one if left empty
    #[arg(short = 'n', long, default_value = "")]
    name: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: usize,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: usize,
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "Carrot Rush".to_string(),
        window_width: args.width as i32,
        window_height: args.height as i32,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    info!("Controls: click or hold to move, R to rejoin, H to show prediction history");

    let server_addr = match args.server.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid server address {}: {}", args.server, e);
            return;
        }
    };

    let mut network = match NetworkHandle::spawn(server_addr, args.fake_ping) {
        Ok(network) => network,
        Err(e) => {
            error!("Failed to start networking: {}", e);
            return;
        }
    };

    let mut game = ClientGameState::new(args.name);
    let mut input_manager = InputManager::new();
    let renderer = Renderer::new(args.width, args.height);
    let mut ui = UiConfig {
        show_history: false,
        fake_ping_ms: args.fake_ping,
    };

    let tick_ms = PREDICTION_TICK.as_millis() as u64;
    let mut last_tick = 0u64;

    loop {
        if is_key_pressed(KeyCode::Escape) {
            break;
        }

        while let Some(packet) = network.try_recv() {
            game.apply_packet(packet);
        }

        let actions = input_manager.update(renderer.camera_origin(game.predicted));
        if let Some(destination) = actions.destination {
            game.set_destination(destination);
        }
        if actions.rejoin {
            game.rejoin();
        }
        if actions.toggle_history {
            ui.show_history = !ui.show_history;
        }

        // Prediction runs at a fixed rate regardless of the frame rate
        let now = get_timestamp();
        if now.saturating_sub(last_tick) >= tick_ms {
            last_tick = now;
            for packet in game.tick(now) {
                network.send(packet);
            }
        }

        renderer.render(&game, &ui);
        next_frame().await;
    }

    if game.is_joined() {
        network.send(Packet::Leave);
        // Give the network thread a moment to flush
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}
