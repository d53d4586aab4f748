//! Reliable per-peer channel
//!
//! Layers sequence numbers, ACKs, retransmission and replay defense on top of
//! the framer and the payload cipher. One channel owns one TCP connection for
//! its whole life; writes are serialized through the write-half mutex so a
//! multi-line board blob always arrives as one contiguous frame, and reads
//! happen from a single logical place at a time (either the ACK wait inside
//! `send` or the session's `recv`).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{
    ACK_WAIT_DEFAULT, ACK_WAIT_STRICT, MAX_RETRIES, REPLAY_WINDOW, RETRY_DELAY,
};
use crate::net::crypto::PayloadCipher;
use crate::net::packet::{read_packet, FrameError, Packet, PacketKind};
use crate::net::replay::{ReplayWindow, Verdict};

/// Session notices that must not be retried blindly: the move itself, and the
/// turn-transition messages. These get one long ACK wait instead of retries.
const STRICT_MARKERS: [&str; 2] = ["It's your turn", "Waiting for Player"];

/// Timing knobs, defaulting to the wire-protocol constants. Tests shrink
/// them to keep the suite fast.
#[derive(Debug, Clone)]
pub struct ChannelTuning {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub ack_wait: Duration,
    pub ack_wait_strict: Duration,
    /// Once a frame has started arriving, its body must complete within this
    /// deadline or the peer is treated as gone.
    pub frame_deadline: Duration,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            ack_wait: ACK_WAIT_DEFAULT,
            ack_wait_strict: ACK_WAIT_STRICT,
            frame_deadline: Duration::from_secs(5),
        }
    }
}

/// An encoded frame awaiting acknowledgment, kept verbatim so a
/// retransmission request can be answered with identical bytes.
#[derive(Debug)]
struct PendingFrame {
    bytes: Vec<u8>,
    first_sent: Instant,
}

pub struct Channel {
    addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    cipher: PayloadCipher,
    next_seq: AtomicU8,
    pending_acks: Mutex<HashMap<u8, PendingFrame>>,
    replay: Mutex<ReplayWindow>,
    tuning: ChannelTuning,
}

enum AckWait {
    Acked,
    TimedOut,
    /// Fresh game state arrived mid-wait; the caller should resend.
    Abandoned,
}

impl Channel {
    pub fn new(stream: TcpStream, key: [u8; 32]) -> Self {
        Self::with_tuning(stream, key, ChannelTuning::default())
    }

    pub fn with_tuning(stream: TcpStream, key: [u8; 32], tuning: ChannelTuning) -> Self {
        let addr = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (reader, writer) = stream.into_split();
        Self {
            addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            cipher: PayloadCipher::new(key),
            next_seq: AtomicU8::new(0),
            pending_acks: Mutex::new(HashMap::new()),
            replay: Mutex::new(ReplayWindow::new()),
            tuning,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Reliably send one packet: allocate a sequence, encrypt, transmit, and
    /// wait for the acknowledgment, retransmitting per the kind's policy.
    ///
    /// Any error here is a peer-lost signal to the session.
    pub async fn send(&self, kind: PacketKind, payload: &[u8]) -> Result<(), ChannelError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let strict = is_strict(kind, payload);

        let ciphertext = self.cipher.transform(seq, payload.to_vec());
        let bytes = Packet::new(kind, seq, ciphertext).encode();

        {
            let mut pending = self.pending_acks.lock().await;
            pending.insert(
                seq,
                PendingFrame {
                    bytes: bytes.clone(),
                    first_sent: Instant::now(),
                },
            );
            gc_pending(&mut pending, seq);
        }

        let (attempts, wait) = if strict {
            (1, self.tuning.ack_wait_strict)
        } else {
            (1 + self.tuning.max_retries, self.tuning.ack_wait)
        };

        let mut outcome = Err(ChannelError::AckTimeout { seq });
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("retransmitting seq {} to {} (attempt {})", seq, self.addr, attempt + 1);
                tokio::time::sleep(self.tuning.retry_delay).await;
            }
            if let Err(e) = self.write_frame(&bytes).await {
                outcome = Err(e);
                break;
            }
            match self.wait_for_ack(seq, wait).await {
                Ok(AckWait::Acked) => {
                    outcome = Ok(());
                    break;
                }
                Ok(AckWait::TimedOut) => {
                    // A concurrent recv on this channel may have read our ACK
                    // and cleared the entry; that counts as acknowledged.
                    if !self.pending_acks.lock().await.contains_key(&seq) {
                        outcome = Ok(());
                        break;
                    }
                    continue;
                }
                Ok(AckWait::Abandoned) => break,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.pending_acks.lock().await.remove(&seq);
        if let Err(e) = &outcome {
            warn!("send of seq {} to {} failed: {}", seq, self.addr, e);
        }
        outcome
    }

    /// Convenience wrapper for line-oriented text payloads.
    pub async fn send_text(&self, kind: PacketKind, text: &str) -> Result<(), ChannelError> {
        self.send(kind, text.as_bytes()).await
    }

    /// Receive one application payload, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and on frames that were consumed by the
    /// protocol itself (duplicates, control traffic, corrupt frames that were
    /// answered with a retransmission request).
    pub async fn recv(
        &self,
        timeout: Duration,
    ) -> Result<Option<(PacketKind, Vec<u8>)>, ChannelError> {
        let reader = self.reader.lock().await;
        self.recv_locked(reader, timeout).await
    }

    /// Like `recv`, but backs off with `Ok(None)` when another task already
    /// holds the read half (e.g. a send waiting on its ACK). Used by pollers
    /// that must never contend with the owning task's reads.
    pub async fn recv_if_idle(
        &self,
        timeout: Duration,
    ) -> Result<Option<(PacketKind, Vec<u8>)>, ChannelError> {
        match self.reader.try_lock() {
            Ok(reader) => self.recv_locked(reader, timeout).await,
            Err(_) => Ok(None),
        }
    }

    async fn recv_locked(
        &self,
        mut reader: tokio::sync::MutexGuard<'_, OwnedReadHalf>,
        timeout: Duration,
    ) -> Result<Option<(PacketKind, Vec<u8>)>, ChannelError> {
        let packet = {
            // Wait for data with a non-consuming peek first, so a caller
            // timeout can never cancel a read mid-frame and desync the
            // stream.
            let mut probe = [0u8; 1];
            match tokio::time::timeout(timeout, reader.peek(&mut probe)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(ChannelError::Closed),
                Ok(Err(e)) => return Err(ChannelError::Io(e)),
                Ok(Ok(_)) => {}
            }
            match self.read_frame(&mut reader).await {
                Ok(packet) => packet,
                Err(e) => return self.on_frame_error(e).await,
            }
        };

        match packet.kind {
            PacketKind::Ack => {
                // Stray ACK outside a send's wait; clear the entry it names.
                self.pending_acks.lock().await.remove(&packet.seq);
                Ok(None)
            }
            PacketKind::RetxRequest => {
                self.honor_retx_request(&packet).await?;
                Ok(None)
            }
            _ => {
                let verdict = self.replay.lock().await.check(packet.seq);
                if verdict == Verdict::Replay {
                    // Already delivered: re-ACK so the sender stops, but do
                    // not hand it to the application again.
                    debug!("replayed seq {} from {}, re-acking", packet.seq, self.addr);
                    self.send_ack(packet.seq).await?;
                    return Ok(None);
                }
                self.send_ack(packet.seq).await?;
                self.replay.lock().await.mark_acked(packet.seq);
                let payload = self.cipher.transform(packet.seq, packet.payload);
                Ok(Some((packet.kind, payload)))
            }
        }
    }

    /// Non-destructive liveness check used by the connection monitor. When
    /// the read half is busy (a session task is blocked on it), the peer is
    /// reported alive; that task will surface the loss itself.
    pub async fn probe(&self) -> bool {
        let mut reader = match self.reader.try_lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        let mut buf = [0u8; 1];
        match tokio::time::timeout(Duration::from_millis(20), reader.peek(&mut buf)).await {
            Ok(Ok(0)) => false,
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => true,
        }
    }

    /// Read one whole frame under the frame deadline. Only called after a
    /// peek confirmed bytes are waiting, so a stall here means the peer died
    /// mid-frame.
    async fn read_frame(&self, reader: &mut OwnedReadHalf) -> Result<Packet, FrameError> {
        match tokio::time::timeout(self.tuning.frame_deadline, read_packet(reader)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("frame from {} stalled past the read deadline", self.addr);
                Err(FrameError::Short)
            }
        }
    }

    async fn on_frame_error(
        &self,
        err: FrameError,
    ) -> Result<Option<(PacketKind, Vec<u8>)>, ChannelError> {
        match err {
            FrameError::Checksum { .. } | FrameError::UnknownKind(_) => {
                warn!("bad frame from {}: {}", self.addr, err);
                self.request_retx(err.observed_seq()).await?;
                Ok(None)
            }
            // A short read on a stream socket means the peer went away.
            FrameError::Short => {
                warn!("connection to {} closed mid-frame", self.addr);
                Err(ChannelError::Closed)
            }
            FrameError::Io(e) => Err(ChannelError::Io(e)),
        }
    }

    /// Ask the peer to resend our best guess at the damaged sequence.
    async fn request_retx(&self, observed: Option<u8>) -> Result<(), ChannelError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let missing = observed.unwrap_or_else(|| seq.wrapping_sub(1));
        let payload = self.cipher.transform(seq, vec![missing]);
        let bytes = Packet::new(PacketKind::RetxRequest, seq, payload).encode();
        self.write_frame(&bytes).await
    }

    async fn honor_retx_request(&self, packet: &Packet) -> Result<(), ChannelError> {
        let payload = self.cipher.transform(packet.seq, packet.payload.clone());
        let Some(&missing) = payload.first() else {
            warn!("empty retransmission request from {}", self.addr);
            return Ok(());
        };
        let stored = {
            let pending = self.pending_acks.lock().await;
            pending.get(&missing).map(|f| (f.bytes.clone(), f.first_sent))
        };
        match stored {
            Some((bytes, first_sent)) => {
                debug!(
                    "retransmitting seq {} to {} on request ({}ms after first send)",
                    missing,
                    self.addr,
                    first_sent.elapsed().as_millis()
                );
                self.write_frame(&bytes).await
            }
            None => {
                debug!(
                    "retransmission request from {} for unknown seq {}",
                    self.addr, missing
                );
                Ok(())
            }
        }
    }

    async fn send_ack(&self, seq: u8) -> Result<(), ChannelError> {
        self.write_frame(&Packet::ack(seq).encode()).await
    }

    async fn write_frame(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Drain incoming frames until the ACK for `seq` arrives or the budget
    /// runs out. Data frames arriving meanwhile are acknowledged immediately
    /// so the peer stops retransmitting them, then dropped.
    async fn wait_for_ack(&self, seq: u8, budget: Duration) -> Result<AckWait, ChannelError> {
        let started = Instant::now();
        let deadline = started + budget;
        let mut reader = self.reader.lock().await;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(AckWait::TimedOut);
            }

            let mut probe = [0u8; 1];
            match tokio::time::timeout(remaining, reader.peek(&mut probe)).await {
                Err(_) => return Ok(AckWait::TimedOut),
                Ok(Ok(0)) => return Err(ChannelError::Closed),
                Ok(Err(e)) => return Err(ChannelError::Io(e)),
                Ok(Ok(_)) => {}
            }

            let packet = match self.read_frame(&mut reader).await {
                Ok(packet) => packet,
                Err(FrameError::Short) => return Err(ChannelError::Closed),
                Err(FrameError::Io(e)) => return Err(ChannelError::Io(e)),
                Err(e) => {
                    warn!("bad frame from {} while awaiting ack: {}", self.addr, e);
                    continue;
                }
            };

            match packet.kind {
                PacketKind::Ack if packet.seq == seq => return Ok(AckWait::Acked),
                PacketKind::Ack => {
                    self.pending_acks.lock().await.remove(&packet.seq);
                }
                PacketKind::RetxRequest => {
                    self.honor_retx_request(&packet).await?;
                }
                kind => {
                    // Not ours to deliver here, but ACK it so the peer does
                    // not keep retransmitting while we hold the reader.
                    self.send_ack(packet.seq).await?;

                    if kind == PacketKind::GameState && started.elapsed() * 2 >= budget {
                        // Board state overtook us late in the wait; give up
                        // so the caller resends against the new state.
                        return Ok(AckWait::Abandoned);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("addr", &self.addr).finish_non_exhaustive()
    }
}

/// Drop pending entries that have fallen out of the sequence window.
fn gc_pending(pending: &mut HashMap<u8, PendingFrame>, current: u8) {
    pending.retain(|&seq, _| current.wrapping_sub(seq) < REPLAY_WINDOW);
}

fn is_strict(kind: PacketKind, payload: &[u8]) -> bool {
    if kind == PacketKind::PlayerMove {
        return true;
    }
    match std::str::from_utf8(payload) {
        Ok(text) => STRICT_MARKERS.iter().any(|m| text.contains(m)),
        Err(_) => false,
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no acknowledgment for seq {seq}")]
    AckTimeout { seq: u8 },

    #[error("peer connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const KEY: [u8; 32] = [7u8; 32];

    fn fast_tuning() -> ChannelTuning {
        ChannelTuning {
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
            ack_wait: Duration::from_millis(50),
            ack_wait_strict: Duration::from_millis(100),
            frame_deadline: Duration::from_secs(1),
        }
    }

    async fn channel_pair() -> (Arc<Channel>, Arc<Channel>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (client, (server, _)) = tokio::join!(connect, async {
            listener.accept().await.unwrap()
        });
        (
            Arc::new(Channel::with_tuning(client.unwrap(), KEY, fast_tuning())),
            Arc::new(Channel::with_tuning(server, KEY, fast_tuning())),
        )
    }

    #[tokio::test]
    async fn send_is_acked_and_delivered() {
        let (a, b) = channel_pair().await;

        let sender = tokio::spawn({
            let a = a.clone();
            async move { a.send(PacketKind::System, b"[INFO] Welcome!").await }
        });

        let received = b.recv(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(received.0, PacketKind::System);
        assert_eq!(received.1, b"[INFO] Welcome!");

        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn recv_timeout_is_none() {
        let (_a, b) = channel_pair().await;
        let got = b.recv(Duration::from_millis(30)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn unacked_send_times_out() {
        let (a, _b) = channel_pair().await;
        // Nobody ever reads on the other side, so no ACK comes back.
        let err = a.send(PacketKind::Chat, b"anyone there?").await.unwrap_err();
        assert!(matches!(err, ChannelError::AckTimeout { .. }));
    }

    #[tokio::test]
    async fn consecutive_sends_deliver() {
        let (a, b) = channel_pair().await;

        for expected in b"AB" {
            let sender = tokio::spawn({
                let a = a.clone();
                let byte = *expected;
                async move { a.send(PacketKind::Chat, &[byte]).await }
            });
            let (_, payload) = b.recv(Duration::from_secs(1)).await.unwrap().unwrap();
            assert_eq!(payload, vec![*expected]);
            sender.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn closed_peer_surfaces_on_recv() {
        let (a, b) = channel_pair().await;
        drop(a);
        let err = b.recv(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed | ChannelError::Io(_)));
    }
}
