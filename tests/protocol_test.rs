//! Protocol integration tests
//!
//! One side is a real `Channel`; the other is a hand-driven raw socket so the
//! tests can inspect wire bytes, withhold ACKs, replay frames and corrupt
//! checksums. The final test drives a whole game through the lobby.

use std::sync::Arc;
use std::time::Duration;

use broadside::config::{Config, DEFAULT_KEY_HEX};
use broadside::net::{
    read_packet, Channel, ChannelError, ChannelTuning, Packet, PacketKind, PayloadCipher,
};
use broadside::server::Lobby;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const KEY: [u8; 32] = [0x24; 32];

fn tuning() -> ChannelTuning {
    ChannelTuning {
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        ack_wait: Duration::from_millis(150),
        ack_wait_strict: Duration::from_millis(300),
        frame_deadline: Duration::from_secs(2),
    }
}

/// A `Channel` on one end, a raw stream we drive by hand on the other.
async fn channel_and_raw() -> (Arc<Channel>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (raw, _) = accepted.unwrap();
    (
        Arc::new(Channel::with_tuning(client.unwrap(), KEY, tuning())),
        raw,
    )
}

fn encode_data(kind: PacketKind, seq: u8, plaintext: &[u8]) -> Vec<u8> {
    let cipher = PayloadCipher::new(KEY);
    Packet::new(kind, seq, cipher.transform(seq, plaintext.to_vec())).encode()
}

fn decrypt(packet: &Packet) -> Vec<u8> {
    PayloadCipher::new(KEY).transform(packet.seq, packet.payload.clone())
}

async fn next_frame(raw: &mut TcpStream) -> Packet {
    timeout(Duration::from_secs(2), read_packet(raw))
        .await
        .expect("timed out waiting for a frame")
        .expect("frame failed to decode")
}

async fn write_ack(raw: &mut TcpStream, seq: u8) {
    raw.write_all(&Packet::ack(seq).encode()).await.unwrap();
}

#[tokio::test]
async fn send_goes_out_encrypted_and_completes_on_ack() {
    let (channel, mut raw) = channel_and_raw().await;

    let sender = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send(PacketKind::Chat, b"attack at dawn").await }
    });

    let frame = next_frame(&mut raw).await;
    assert_eq!(frame.kind, PacketKind::Chat);
    assert_eq!(frame.seq, 0);
    // Confidentiality: the plaintext must not appear on the wire.
    assert_ne!(frame.payload, b"attack at dawn".to_vec());
    assert_eq!(decrypt(&frame), b"attack at dawn".to_vec());

    write_ack(&mut raw, frame.seq).await;
    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn duplicate_frame_is_reacked_but_not_redelivered() {
    let (channel, mut raw) = channel_and_raw().await;
    let frame = encode_data(PacketKind::PlayerMove, 7, b"B5");

    raw.write_all(&frame).await.unwrap();
    let first = channel.recv(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first, Some((PacketKind::PlayerMove, b"B5".to_vec())));
    let ack = next_frame(&mut raw).await;
    assert_eq!((ack.kind, ack.seq), (PacketKind::Ack, 7));

    // Replay the identical frame: the channel must re-ACK so we stop
    // retransmitting, but the payload must not reach the application twice.
    raw.write_all(&frame).await.unwrap();
    let second = channel.recv(Duration::from_millis(300)).await.unwrap();
    assert_eq!(second, None);
    let re_ack = next_frame(&mut raw).await;
    assert_eq!((re_ack.kind, re_ack.seq), (PacketKind::Ack, 7));
}

#[tokio::test]
async fn retx_request_yields_identical_retransmission() {
    let (channel, mut raw) = channel_and_raw().await;

    let sender = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send(PacketKind::GameUpdate, b"[INFO] HIT!").await }
    });

    let original = next_frame(&mut raw).await;

    // Instead of ACKing, claim the frame went missing.
    let request = encode_data(PacketKind::RetxRequest, 99, &[original.seq]);
    raw.write_all(&request).await.unwrap();

    let replayed = next_frame(&mut raw).await;
    assert_eq!(replayed, original);

    write_ack(&mut raw, original.seq).await;
    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn corrupt_frame_triggers_retx_request() {
    let (channel, mut raw) = channel_and_raw().await;

    let mut frame = encode_data(PacketKind::System, 3, b"[INFO] hello");
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    raw.write_all(&frame).await.unwrap();

    // The damaged frame is consumed whole and not delivered.
    let got = channel.recv(Duration::from_millis(300)).await.unwrap();
    assert_eq!(got, None);

    // And the channel asks for the sequence it observed in the bad header.
    let request = next_frame(&mut raw).await;
    assert_eq!(request.kind, PacketKind::RetxRequest);
    assert_eq!(decrypt(&request), vec![3]);
}

#[tokio::test]
async fn strict_sends_try_once_default_sends_retry() {
    let (channel, mut raw) = channel_and_raw().await;

    // Player moves are strict: exactly one attempt, no retransmissions.
    let err = channel.send(PacketKind::PlayerMove, b"E5").await.unwrap_err();
    assert!(matches!(err, ChannelError::AckTimeout { .. }));
    let first = next_frame(&mut raw).await;
    assert_eq!(first.kind, PacketKind::PlayerMove);
    assert!(
        timeout(Duration::from_millis(200), read_packet(&mut raw))
            .await
            .is_err(),
        "strict send must not retransmit"
    );

    // Everything else retries MAX_RETRIES times on top of the first attempt.
    let err = channel.send(PacketKind::Chat, b"gg").await.unwrap_err();
    assert!(matches!(err, ChannelError::AckTimeout { .. }));
    for _ in 0..3 {
        let frame = next_frame(&mut raw).await;
        assert_eq!(frame.kind, PacketKind::Chat);
    }
    assert!(
        timeout(Duration::from_millis(200), read_packet(&mut raw))
            .await
            .is_err(),
        "default send retries exactly MAX_RETRIES times"
    );
}

#[tokio::test]
async fn sequence_wrap_accepts_ascending_run() {
    let (channel, mut raw) = channel_and_raw().await;

    for seq in [254u8, 255, 0, 1] {
        let frame = encode_data(PacketKind::Chat, seq, &[seq]);
        raw.write_all(&frame).await.unwrap();
        let got = channel.recv(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, Some((PacketKind::Chat, vec![seq])), "seq {}", seq);
        let ack = next_frame(&mut raw).await;
        assert_eq!((ack.kind, ack.seq), (PacketKind::Ack, seq));
    }
}

// =============================================================================
// END TO END
// =============================================================================

/// Wait until the server sends a message containing `marker`. Generous
/// deadline: some markers sit on the far side of the 8-second countdown.
async fn await_message_containing(channel: &Arc<Channel>, marker: &str) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        if let Ok(Some((_, payload))) = channel.recv(Duration::from_millis(100)).await {
            let message = String::from_utf8_lossy(&payload).into_owned();
            if message.contains(marker) {
                return message;
            }
        }
    }
    panic!("never saw a message containing {:?}", marker);
}

/// Drive a proper client over its own `Channel`: consume traffic, answer the
/// setup prompt with RANDOM, and optionally quit when the turn arrives.
/// Returns every text payload seen, once `looking_for` has shown up.
async fn drive_client(
    channel: Arc<Channel>,
    quit_on_turn: bool,
    looking_for: &str,
) -> Vec<String> {
    let mut seen = Vec::new();
    let mut setup_done = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(40);

    while tokio::time::Instant::now() < deadline {
        let message = match channel.recv(Duration::from_millis(100)).await {
            Ok(Some((_, payload))) => String::from_utf8_lossy(&payload).into_owned(),
            Ok(None) => continue,
            Err(_) => break,
        };
        seen.push(message.clone());

        if message.contains(looking_for) {
            return seen;
        }
        if !setup_done && message.contains("SETUP PHASE") {
            setup_done = true;
            channel
                .send(PacketKind::PlayerMove, b"RANDOM")
                .await
                .expect("setup choice should be deliverable");
        }
        if quit_on_turn && message.contains("It's your turn") {
            channel
                .send(PacketKind::PlayerMove, b"quit")
                .await
                .expect("quit should be deliverable");
        }
    }
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refuses_connections_during_setup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let key = broadside::config::parse_key(DEFAULT_KEY_HEX).unwrap();
    let lobby = Lobby::new(Config { key, ..Config::default() });
    let server = {
        let lobby = lobby.clone();
        tokio::spawn(async move { lobby.run(listener).await })
    };

    let p1 = Arc::new(Channel::new(TcpStream::connect(addr).await.unwrap(), key));
    await_message_containing(&p1, "You are Player 1.").await;
    let p2 = Arc::new(Channel::new(TcpStream::connect(addr).await.unwrap(), key));
    await_message_containing(&p2, "You are Player 2.").await;

    // Sit through the countdown; neither player answers the setup prompt, so
    // the lifecycle parks in SETUP.
    let consume = |channel: Arc<Channel>| async move {
        await_message_containing(&channel, "SETUP PHASE").await;
        channel
    };
    let (p1, p2) = tokio::join!(consume(p1), consume(p2));

    // A newcomer mid-setup is turned away politely.
    let late = Arc::new(Channel::new(TcpStream::connect(addr).await.unwrap(), key));
    let refusal = await_message_containing(&late, "Sorry").await;
    assert!(
        refusal.contains("game is being set up"),
        "unexpected refusal: {:?}",
        refusal
    );

    drop((p1, p2));
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_game_forfeit_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let key = broadside::config::parse_key(DEFAULT_KEY_HEX).unwrap();
    let config = Config {
        key,
        ..Config::default()
    };
    let lobby = Lobby::new(config);
    let server = {
        let lobby = lobby.clone();
        tokio::spawn(async move { lobby.run(listener).await })
    };

    // Seat the three connections one at a time so the player numbering is
    // deterministic.
    let p1 = Arc::new(Channel::new(TcpStream::connect(addr).await.unwrap(), key));
    await_message_containing(&p1, "You are Player 1.").await;
    let p2 = Arc::new(Channel::new(TcpStream::connect(addr).await.unwrap(), key));
    await_message_containing(&p2, "You are Player 2.").await;
    let watcher = Arc::new(Channel::new(TcpStream::connect(addr).await.unwrap(), key));
    await_message_containing(&watcher, "You are Spectator 1.").await;

    // Player 1 forfeits on their first turn; player 2 should win by default.
    let p1_run = tokio::spawn(drive_client(p1, true, "You forfeited."));
    let p2_run = tokio::spawn(drive_client(p2, false, "You win!"));
    let spec_run = tokio::spawn(drive_client(watcher, false, "wins!"));

    let p2_seen = p2_run.await.unwrap();
    assert!(
        p2_seen
            .iter()
            .any(|m| m.contains("Your opponent forfeited. You win!")),
        "player 2 never won: {:?}",
        p2_seen
    );

    let spec_seen = spec_run.await.unwrap();
    assert!(
        spec_seen
            .iter()
            .any(|m| m.contains("Player 1 forfeited. Player 2 wins!")),
        "spectator never saw the forfeit: {:?}",
        spec_seen
    );

    let p1_seen = p1_run.await.unwrap();
    assert!(
        p1_seen.iter().any(|m| m.contains("It's your turn")),
        "player 1 never got the turn prompt: {:?}",
        p1_seen
    );

    server.abort();
}
