//! Broadside server
//!
//! Seats the first two connections as players, everyone after them as
//! spectators, and runs Battleship games back to back until interrupted.

use broadside::config::{parse_key, Config, DEFAULT_HOST, DEFAULT_KEY_HEX, DEFAULT_MAX_SPECTATORS, DEFAULT_PORT};
use broadside::server::Lobby;
use clap::Parser;
use std::net::IpAddr;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "broadside", version, about = "Broadside: networked Battleship server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = DEFAULT_HOST)]
    host: IpAddr,

    /// Listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum spectators on top of the two players
    #[arg(long, default_value_t = DEFAULT_MAX_SPECTATORS)]
    max_spectators: usize,

    /// Pre-shared payload key, 64 hex digits
    #[arg(long, default_value = DEFAULT_KEY_HEX)]
    key: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("broadside=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();

    let key = match parse_key(&args.key) {
        Ok(key) => key,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = Config {
        host: args.host,
        port: args.port,
        max_spectators: args.max_spectators,
        key,
    };

    info!("Broadside v{}", VERSION);
    info!(
        "Listening on {}:{} | players: 2 | max spectators: {}",
        config.host, config.port, config.max_spectators
    );

    let listener = match TcpListener::bind((config.host, config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}:{}: {}", config.host, config.port, e);
            return ExitCode::FAILURE;
        }
    };

    let lobby = Lobby::new(config);

    tokio::select! {
        result = lobby.run(listener) => {
            if let Err(e) = result {
                error!("Accept loop failed: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            lobby.shutdown().await;
            ExitCode::SUCCESS
        }
    }
}
