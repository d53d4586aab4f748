//! Wire framing
//!
//! One frame is a fixed 6-byte header followed by the encrypted payload:
//!
//! ```text
//! byte 0    : kind (u8)
//! byte 1    : seq (u8)
//! bytes 2..4: checksum (u16 BE)
//! bytes 4..6: payload_len (u16 BE)
//! bytes 6.. : payload (payload_len bytes, ciphertext)
//! ```
//!
//! The checksum is the sum mod 65536 of the header with the checksum field
//! zeroed, concatenated with the payload. It detects accidental corruption
//! only; it is not a MAC.

use std::io;
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Header size on the wire.
pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    GameUpdate = 1,
    PlayerMove = 2,
    BoardUpdate = 3,
    Chat = 4,
    System = 5,
    RetxRequest = 6,
    Ack = 7,
    GameState = 8,
    UiMode = 9,
}

impl PacketKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::GameUpdate),
            2 => Some(Self::PlayerMove),
            3 => Some(Self::BoardUpdate),
            4 => Some(Self::Chat),
            5 => Some(Self::System),
            6 => Some(Self::RetxRequest),
            7 => Some(Self::Ack),
            8 => Some(Self::GameState),
            9 => Some(Self::UiMode),
            _ => None,
        }
    }

}

/// Client UI states, carried in `PacketKind::UiMode` payloads so the client
/// never has to infer its state from human-readable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMode {
    Setup,
    Turn,
    Wait,
    Ended,
}

impl UiMode {
    pub fn token(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Turn => "turn",
            Self::Wait => "wait",
            Self::Ended => "ended",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "setup" => Some(Self::Setup),
            "turn" => Some(Self::Turn),
            "wait" => Some(Self::Wait),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// One framed packet. The payload holds ciphertext; callers go through the
/// cipher before and after framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketKind, seq: u8, payload: Vec<u8>) -> Self {
        Self { kind, seq, payload }
    }

    /// An acknowledgment for `seq`. Empty payload.
    pub fn ack(seq: u8) -> Self {
        Self::new(PacketKind::Ack, seq, Vec::new())
    }

    /// A retransmission request naming the missing sequence.
    pub fn retx_request(seq: u8, missing: u8) -> Self {
        Self::new(PacketKind::RetxRequest, seq, vec![missing])
    }

    /// Serialize to wire bytes, computing the checksum over the zeroed-slot
    /// header plus payload.
    ///
    /// Payloads are bounded by the 16-bit length field.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= u16::MAX as usize);
        let len = self.payload.len() as u16;
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.push(self.kind as u8);
        frame.push(self.seq);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&self.payload);

        let sum = checksum(&frame);
        frame[2..4].copy_from_slice(&sum.to_be_bytes());
        frame
    }

    /// Decode one frame from a byte slice. Used by tests and by callers that
    /// already hold a whole frame.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Short);
        }
        let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
        if data.len() < HEADER_LEN + payload_len {
            return Err(FrameError::Short);
        }
        parse_frame(
            [data[0], data[1], data[2], data[3], data[4], data[5]],
            data[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
        )
    }
}

/// Sum-mod-65536 over the given bytes.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

fn parse_frame(header: [u8; HEADER_LEN], payload: Vec<u8>) -> Result<Packet, FrameError> {
    let wire_sum = u16::from_be_bytes([header[2], header[3]]);
    let seq = header[1];

    let mut zeroed = header;
    zeroed[2] = 0;
    zeroed[3] = 0;
    let mut expected = checksum(&zeroed);
    expected = expected.wrapping_add(checksum(&payload));

    if expected != wire_sum {
        return Err(FrameError::Checksum {
            seq,
            expected,
            actual: wire_sum,
        });
    }

    let kind = PacketKind::from_u8(header[0]).ok_or(FrameError::UnknownKind(header[0]))?;
    Ok(Packet { kind, seq, payload })
}

/// Read exactly one frame from the stream.
///
/// Never consumes bytes beyond the frame. A checksum failure still consumes
/// the whole frame; the caller is expected to ask for a retransmission.
pub async fn read_packet<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Packet, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(map_read_err)?;

    let payload_len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await.map_err(map_read_err)?;

    parse_frame(header, payload)
}

fn map_read_err(e: io::Error) -> FrameError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::Short
    } else {
        FrameError::Io(e)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("truncated frame")]
    Short,

    #[error("checksum mismatch on seq {seq}: expected {expected:#06x}, got {actual:#06x}")]
    Checksum { seq: u8, expected: u16, actual: u16 },

    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Sequence number observed in the broken frame, when the header survived
    /// well enough to name one. Used for best-guess retransmission requests.
    pub fn observed_seq(&self) -> Option<u8> {
        match self {
            FrameError::Checksum { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let p = Packet::new(PacketKind::System, 42, b"hello there".to_vec());
        let decoded = Packet::decode(&p.encode()).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn roundtrip_all_kinds() {
        for raw in 1..=9u8 {
            let kind = PacketKind::from_u8(raw).unwrap();
            let p = Packet::new(kind, raw, vec![raw; raw as usize]);
            assert_eq!(Packet::decode(&p.encode()).unwrap(), p);
        }
    }

    #[test]
    fn ack_has_empty_payload() {
        let frame = Packet::ack(7).encode();
        assert_eq!(frame.len(), HEADER_LEN);
        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(decoded.kind, PacketKind::Ack);
        assert_eq!(decoded.seq, 7);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = Packet::new(PacketKind::Chat, 3, b"gg".to_vec()).encode();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        match Packet::decode(&frame) {
            Err(FrameError::Checksum { seq: 3, .. }) => {}
            other => panic!("expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn corrupted_header_fails_checksum() {
        let mut frame = Packet::new(PacketKind::Chat, 3, b"gg".to_vec()).encode();
        frame[1] = frame[1].wrapping_add(1);
        assert!(matches!(
            Packet::decode(&frame),
            Err(FrameError::Checksum { .. })
        ));
    }

    #[test]
    fn short_frame() {
        let frame = Packet::new(PacketKind::System, 0, b"truncate me".to_vec()).encode();
        assert!(matches!(
            Packet::decode(&frame[..frame.len() - 4]),
            Err(FrameError::Short)
        ));
        assert!(matches!(Packet::decode(&frame[..3]), Err(FrameError::Short)));
    }

    #[test]
    fn max_payload_length_is_encodable() {
        let p = Packet::new(PacketKind::BoardUpdate, 255, vec![0xab; u16::MAX as usize]);
        let frame = p.encode();
        assert_eq!(frame.len(), HEADER_LEN + u16::MAX as usize);
        assert_eq!(Packet::decode(&frame).unwrap(), p);
    }

    #[tokio::test]
    async fn async_read_matches_sync_decode() {
        let p = Packet::new(PacketKind::GameUpdate, 9, b"salvo".to_vec());
        let frame = p.encode();
        let mut reader = &frame[..];
        let decoded = read_packet(&mut reader).await.unwrap();
        assert_eq!(decoded, p);
        // No trailing bytes consumed.
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn async_read_short_is_framing_error() {
        let frame = Packet::new(PacketKind::System, 1, b"cut off".to_vec()).encode();
        let mut reader = &frame[..4];
        assert!(matches!(read_packet(&mut reader).await, Err(FrameError::Short)));
    }
}
