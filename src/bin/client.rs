//! Line-oriented Battleship client
//!
//! One task drains framed messages from the server and prints them; the main
//! task forwards stdin lines as moves. Input is gated on the UI mode the
//! server announces (setup / turn / wait / ended) so keystrokes outside the
//! player's turn never reach the wire; 'quit' is always allowed.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use broadside::config::{parse_key, DEFAULT_HOST, DEFAULT_KEY_HEX, DEFAULT_PORT};
use broadside::net::{Channel, PacketKind, UiMode};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "client", version, about = "Broadside: Battleship client")]
struct Args {
    /// Server address
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Pre-shared payload key, 64 hex digits
    #[arg(long, default_value = DEFAULT_KEY_HEX)]
    key: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let key = match parse_key(&args.key) {
        Ok(key) => key,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let stream = match TcpStream::connect((args.host.as_str(), args.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("[ERROR] Connection refused ({}). Make sure the server is running.", e);
            return ExitCode::FAILURE;
        }
    };
    println!("[INFO] Connected to server at {}:{}", args.host, args.port);
    println!("[INFO] Waiting for the game to start...");

    let channel = Arc::new(Channel::new(stream, key));
    let mode = Arc::new(Mutex::new(UiMode::Wait));

    let printer = tokio::spawn(print_loop(channel.clone(), mode.clone()));

    // The printer exits the process when the server goes away, so the main
    // loop only has to watch stdin.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") {
            let _ = channel.send_text(PacketKind::PlayerMove, "quit").await;
            println!("[INFO] You chose to quit.");
            break;
        }

        let current = *mode.lock().await;
        match current {
            UiMode::Setup | UiMode::Turn => {
                if channel.send_text(PacketKind::PlayerMove, &line).await.is_err() {
                    println!("[INFO] Connection lost.");
                    break;
                }
            }
            UiMode::Wait => {
                println!("[INFO] It's not your turn yet; input ignored.");
            }
            UiMode::Ended => {
                println!("[INFO] The game has ended; input ignored. Type 'quit' to leave.");
            }
        }
    }

    printer.abort();
    println!("[INFO] Disconnected from server.");
    ExitCode::SUCCESS
}

/// Drain and print server traffic, tracking UI mode transitions.
async fn print_loop(channel: Arc<Channel>, mode: Arc<Mutex<UiMode>>) {
    loop {
        // The idle variant backs off while the main task's send is waiting
        // on its ACK, so the two never fight over the read half.
        match channel.recv_if_idle(Duration::from_millis(200)).await {
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(Some((PacketKind::UiMode, payload))) => {
                let token = String::from_utf8_lossy(&payload).into_owned();
                if let Some(next) = UiMode::from_token(&token) {
                    debug!("ui mode -> {:?}", next);
                    *mode.lock().await = next;
                    if next == UiMode::Ended {
                        println!("[INFO] Game over.");
                    }
                } else {
                    debug!("unknown ui mode token {:?}", token);
                }
            }
            Ok(Some((_, payload))) => {
                println!("{}", String::from_utf8_lossy(&payload));
            }
            Err(e) => {
                debug!("server connection lost: {}", e);
                println!("[INFO] Server disconnected.");
                std::process::exit(0);
            }
        }
    }
}
