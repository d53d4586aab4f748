//! Wire protocol: framing, payload encryption, replay defense and the
//! reliable per-peer channel built on top of them.

pub mod channel;
pub mod crypto;
pub mod packet;
pub mod replay;

// Re-exports
pub use channel::{Channel, ChannelError, ChannelTuning};
pub use crypto::PayloadCipher;
pub use packet::{checksum, read_packet, FrameError, Packet, PacketKind, UiMode, HEADER_LEN};
pub use replay::{ReplayWindow, Verdict};
