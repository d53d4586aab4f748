pub mod config;
pub mod game;
pub mod net;
pub mod server;

pub use config::{Config, ConfigError};
pub use game::{parse_coord, Board, CoordError, Orientation, Shot};
pub use net::{Channel, ChannelError, Packet, PacketKind, UiMode};
pub use server::Lobby;
