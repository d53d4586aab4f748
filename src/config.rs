//! Server and protocol configuration
//!
//! Everything here is a design default; the CLI can override the host, port,
//! spectator limit and pre-shared key.

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// SEATING
// =============================================================================

/// Exactly two active players per game.
pub const MAX_PLAYERS: usize = 2;

/// Default spectator limit. Total admitted connections are
/// MAX_PLAYERS + max_spectators.
pub const DEFAULT_MAX_SPECTATORS: usize = 8;

// =============================================================================
// LIFECYCLE TIMERS
// =============================================================================

/// Countdown between the second player connecting and the game starting.
pub const GAME_START_DELAY: Duration = Duration::from_secs(8);

/// Cooldown after a game before spectators are promoted and a new countdown
/// may begin.
pub const GAME_END_DELAY: Duration = Duration::from_secs(10);

/// Time each player has to place their fleet before the remaining ships are
/// placed randomly.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Setup reminders, in seconds remaining.
pub const SETUP_REMINDERS: [u64; 5] = [45, 30, 15, 10, 5];

/// Time a player has to fire before forfeiting the turn.
pub const MOVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Move-timer reminders, in seconds remaining.
pub const MOVE_REMINDERS: [u64; 5] = [15, 10, 5, 3, 1];

/// How long a disconnected player may take to reconnect before the opponent
/// wins by default.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(30);

/// Cadence of "waiting for Player N to reconnect" reminders.
pub const RECONNECT_REMINDER: Duration = Duration::from_secs(15);

/// Liveness probe cadence for the in-game connection monitor.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// RELIABLE CHANNEL
// =============================================================================

/// Retransmission attempts after the first send (non-strict kinds only).
pub const MAX_RETRIES: u32 = 2;

/// Delay between retransmission attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(50);

/// ACK wait per attempt for ordinary traffic.
pub const ACK_WAIT_DEFAULT: Duration = Duration::from_millis(500);

/// ACK wait for strict-mode traffic (player moves and turn transitions get a
/// single, longer attempt).
pub const ACK_WAIT_STRICT: Duration = Duration::from_secs(1);

/// Sliding replay window size. Must stay below 128 so the modulo-256
/// newer/older split is unambiguous.
pub const REPLAY_WINDOW: u8 = 64;

// =============================================================================
// GAME
// =============================================================================

pub const BOARD_SIZE: usize = 10;

/// The fixed five-ship fleet.
pub const SHIPS: [(&str, usize); 5] = [
    ("Carrier", 5),
    ("Battleship", 4),
    ("Cruiser", 3),
    ("Submarine", 3),
    ("Destroyer", 2),
];

// =============================================================================
// NETWORK
// =============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;

/// Default pre-shared key (hex). Every deployment is expected to override
/// this with `--key`; the default only keeps the out-of-the-box demo working.
pub const DEFAULT_KEY_HEX: &str =
    "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Parse a 64-hex-digit pre-shared key into the 256-bit cipher key.
pub fn parse_key(hex_str: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ConfigError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub max_spectators: usize,
    pub key: [u8; 32],
}

impl Config {
    pub fn max_connections(&self) -> usize {
        MAX_PLAYERS + self.max_spectators
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.parse().expect("default host"),
            port: DEFAULT_PORT,
            max_spectators: DEFAULT_MAX_SPECTATORS,
            key: parse_key(DEFAULT_KEY_HEX).expect("default key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_roundtrip() {
        let key = parse_key(DEFAULT_KEY_HEX).unwrap();
        assert_eq!(hex::encode(key), DEFAULT_KEY_HEX);
    }

    #[test]
    fn parse_key_rejects_short() {
        assert!(parse_key("deadbeef").is_err());
        assert!(parse_key("not hex at all").is_err());
    }

    #[test]
    fn window_fits_split() {
        // The older/newer split in the replay window needs this.
        assert!(REPLAY_WINDOW < 128);
    }
}
