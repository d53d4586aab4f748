//! Lobby and game lifecycle
//!
//! Owns the listener-facing side of the server: admission of new
//! connections, the two player slots and the spectator list, the pre-game
//! countdown, the in-game liveness monitor and the post-game promotion of
//! spectators into empty seats.
//!
//! Lifecycle state machine:
//!
//! ```text
//! IDLE -> COUNTDOWN -> SETUP -> IN_GAME -> POST_GAME -> (COUNTDOWN | IDLE)
//! ```
//!
//! The state enum, the slot table and the countdown-running flag each sit
//! behind their own lock; none of them is held across I/O.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{Config, GAME_START_DELAY, MAX_PLAYERS, PROBE_INTERVAL};
use crate::net::{Channel, PacketKind};
use crate::server::session::{Session, SessionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Countdown,
    Setup,
    InGame,
    PostGame,
}

/// Level-triggered flag: open while both player slots are occupied, cleared
/// while one is empty. Session waits block on it during a reconnect window.
pub struct ReconnectGate {
    tx: watch::Sender<bool>,
}

impl ReconnectGate {
    pub fn new() -> Self {
        Self {
            tx: watch::channel(true).0,
        }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }

    pub async fn wait_closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| !*open).await;
    }
}

impl Default for ReconnectGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Two explicit player slots plus the spectator list. A `None` player slot
/// means that seat's player disconnected and may reconnect.
#[derive(Default)]
pub struct Slots {
    pub players: [Option<Arc<Channel>>; MAX_PLAYERS],
    pub spectators: Vec<Arc<Channel>>,
}

impl Slots {
    pub fn player_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_some()).count()
    }

    pub fn total(&self) -> usize {
        self.player_count() + self.spectators.len()
    }

    pub fn free_player_slot(&self) -> Option<usize> {
        self.players.iter().position(|p| p.is_none())
    }

    pub fn all_channels(&self) -> Vec<Arc<Channel>> {
        self.players
            .iter()
            .flatten()
            .chain(self.spectators.iter())
            .cloned()
            .collect()
    }

    pub fn player_index_of(&self, channel: &Arc<Channel>) -> Option<usize> {
        self.players.iter().position(|p| {
            p.as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, channel))
        })
    }

    fn remove_spectator(&mut self, channel: &Arc<Channel>) -> bool {
        let before = self.spectators.len();
        self.spectators.retain(|c| !Arc::ptr_eq(c, channel));
        self.spectators.len() != before
    }

    fn clear(&mut self) {
        self.players = Default::default();
        self.spectators.clear();
    }
}

pub struct Lobby {
    config: Config,
    state: Mutex<LifecycleState>,
    slots: Arc<Mutex<Slots>>,
    gate: Arc<ReconnectGate>,
    countdown_running: Mutex<bool>,
}

impl Lobby {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(LifecycleState::Idle),
            slots: Arc::new(Mutex::new(Slots::default())),
            gate: Arc::new(ReconnectGate::new()),
            countdown_running: Mutex::new(false),
        })
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().await;
        debug!("lifecycle {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Accept loop. Runs until the listener fails or the task is dropped.
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        tokio::spawn(self.clone().pregame_watcher());
        tokio::spawn(self.clone().connection_monitor());

        loop {
            let (stream, addr) = listener.accept().await?;
            info!("New connection from {}", addr);
            let lobby = self.clone();
            tokio::spawn(async move {
                lobby.admit(stream).await;
            });
        }
    }

    /// Broadcast a farewell and drop every connection. Called on SIGINT.
    pub async fn shutdown(&self) {
        let channels = self.slots.lock().await.all_channels();
        for channel in &channels {
            let _ = channel
                .send_text(PacketKind::System, "[INFO] Server shutting down.")
                .await;
        }
        self.slots.lock().await.clear();
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    async fn admit(self: Arc<Self>, stream: TcpStream) {
        let channel = Arc::new(Channel::new(stream, self.config.key));
        let state = self.state().await;

        enum Decision {
            Reconnect(usize),
            Player(usize),
            Spectator(usize),
            Refuse(&'static str),
        }

        let decision = {
            let mut slots = self.slots.lock().await;
            match state {
                LifecycleState::InGame | LifecycleState::Countdown
                    if slots.free_player_slot().is_some() =>
                {
                    let idx = slots.free_player_slot().unwrap_or(0);
                    slots.players[idx] = Some(channel.clone());
                    Decision::Reconnect(idx)
                }
                LifecycleState::Setup => {
                    Decision::Refuse("[INFO] Sorry, a game is being set up. Please try again later.")
                }
                LifecycleState::PostGame => {
                    Decision::Refuse("[INFO] Sorry, a game just finished. Please try again shortly.")
                }
                _ if slots.total() >= self.config.max_connections() => Decision::Refuse(
                    "[INFO] Sorry, the server has reached the maximum number of connections. Please try again later.",
                ),
                LifecycleState::Idle if slots.free_player_slot().is_some() => {
                    let idx = slots.free_player_slot().unwrap_or(0);
                    slots.players[idx] = Some(channel.clone());
                    Decision::Player(idx)
                }
                _ if slots.spectators.len() < self.config.max_spectators => {
                    slots.spectators.push(channel.clone());
                    Decision::Spectator(slots.spectators.len())
                }
                _ => Decision::Refuse(
                    "[INFO] Sorry, the spectator gallery is full. Please try again later.",
                ),
            }
        };

        match decision {
            Decision::Refuse(reason) => {
                let _ = channel.send_text(PacketKind::System, reason).await;
            }
            Decision::Reconnect(idx) => self.seat_reconnect(channel, idx, state).await,
            Decision::Player(idx) => self.seat_player(channel, idx).await,
            Decision::Spectator(num) => self.seat_spectator(channel, num, state).await,
        }
    }

    async fn seat_reconnect(&self, channel: Arc<Channel>, idx: usize, state: LifecycleState) {
        info!("Player {} reconnected from {}", idx + 1, channel.addr());
        let welcome = format!("[INFO] Welcome back! You are Player {}.", idx + 1);
        if channel.send_text(PacketKind::System, &welcome).await.is_err() {
            self.drop_channel(&channel).await;
            return;
        }
        self.announce_except(
            &channel,
            &format!("[INFO] Player {} has reconnected!", idx + 1),
        )
        .await;
        if state == LifecycleState::InGame {
            self.gate.set();
        }
    }

    async fn seat_player(self: &Arc<Self>, channel: Arc<Channel>, idx: usize) {
        let (total, player_count) = {
            let slots = self.slots.lock().await;
            (slots.total(), slots.player_count())
        };

        info!("Seated Player {} from {}", idx + 1, channel.addr());
        let mut welcome = format!("[INFO] Welcome! You are Player {}.\n", idx + 1);
        if player_count < MAX_PLAYERS {
            welcome.push_str("[INFO] Waiting for a second player to connect...\n");
        }
        welcome.push_str("[TIP] Type 'quit' to exit.");
        if channel.send_text(PacketKind::System, &welcome).await.is_err() {
            self.drop_channel(&channel).await;
            return;
        }

        self.announce_except(
            &channel,
            &format!(
                "[INFO] Player {} has joined. ({}/{} total connections)",
                idx + 1,
                total,
                self.config.max_connections()
            ),
        )
        .await;

        if player_count == MAX_PLAYERS && self.state().await == LifecycleState::Idle {
            self.begin_countdown().await;
        }
    }

    async fn seat_spectator(&self, channel: Arc<Channel>, num: usize, state: LifecycleState) {
        let player_count = self.slots.lock().await.player_count();

        info!("Seated Spectator {} from {}", num, channel.addr());
        let mut welcome = format!("[INFO] Welcome! You are Spectator {}.\n", num);
        welcome.push_str(&format!(
            "[INFO] Active players: {}/{}. You will be able to watch the game but not participate.\n",
            player_count, MAX_PLAYERS
        ));
        welcome.push_str("[TIP] Type 'quit' to exit.");
        if channel.send_text(PacketKind::System, &welcome).await.is_err() {
            self.drop_channel(&channel).await;
            return;
        }

        if state == LifecycleState::Countdown {
            let _ = channel
                .send_text(
                    PacketKind::System,
                    "[INFO] Game is already counting down and will start soon.",
                )
                .await;
        }

        self.announce_except(
            &channel,
            &format!("[INFO] Spectator {} has joined.", num),
        )
        .await;
    }

    // =========================================================================
    // COUNTDOWN
    // =========================================================================

    fn begin_countdown<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut running = self.countdown_running.lock().await;
                if *running {
                    return;
                }
                *running = true;
            }
            self.set_state(LifecycleState::Countdown).await;

            let spectator_count = self.slots.lock().await.spectators.len();
            self.broadcast(&format!(
                "[INFO] Both players connected! Game will start in {} seconds.\n\
                 [INFO] Currently {} spectators connected.\n\
                 [INFO] More spectators can still join before the game starts.",
                GAME_START_DELAY.as_secs(),
                spectator_count
            ))
            .await;

            tokio::spawn(self.clone().run_countdown());
        })
    }

    async fn run_countdown(self: Arc<Self>) {
        for i in (1..=GAME_START_DELAY.as_secs()).rev() {
            let (player_count, spectator_count) = {
                let slots = self.slots.lock().await;
                (slots.player_count(), slots.spectators.len())
            };
            if player_count < MAX_PLAYERS {
                *self.countdown_running.lock().await = false;
                self.cancel_start().await;
                return;
            }
            if i % 5 == 0 || i <= 3 {
                self.broadcast(&format!(
                    "[INFO] Game starting in {} seconds... ({} spectators)",
                    i, spectator_count
                ))
                .await;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        *self.countdown_running.lock().await = false;
        if self.slots.lock().await.player_count() < MAX_PLAYERS {
            self.cancel_start().await;
            return;
        }

        self.set_state(LifecycleState::Setup).await;
        self.gate.set();

        let lobby = self.clone();
        tokio::spawn(async move {
            let session = Session::new(
                lobby.slots.clone(),
                lobby.gate.clone(),
            );
            let outcome = session.run(&lobby).await;
            lobby.post_game(outcome).await;
        });
    }

    /// A player left before the game began: tell everyone, drop every
    /// connection so player numbering resets, and fall back to IDLE.
    async fn cancel_start(&self) {
        warn!("Game start cancelled; resetting lobby");
        self.broadcast(
            "[INFO] A player left. Game start cancelled.\n\
             [INFO] Disconnecting all connections. Please reconnect.",
        )
        .await;
        self.slots.lock().await.clear();
        self.set_state(LifecycleState::Idle).await;
    }

    pub(crate) async fn mark_in_game(&self) {
        self.set_state(LifecycleState::InGame).await;
    }

    // =========================================================================
    // POST GAME
    // =========================================================================

    async fn post_game(self: &Arc<Self>, outcome: SessionOutcome) {
        info!("Session ended: {:?}", outcome);
        self.set_state(LifecycleState::PostGame).await;
        self.broadcast("[INFO] Game over! Thank you for playing/watching!").await;

        tokio::time::sleep(crate::config::GAME_END_DELAY).await;

        // Promote waiting spectators into empty seats, oldest first.
        let mut promotions: Vec<(usize, Arc<Channel>)> = Vec::new();
        {
            let mut slots = self.slots.lock().await;
            for idx in 0..MAX_PLAYERS {
                if slots.players[idx].is_none() && !slots.spectators.is_empty() {
                    let channel = slots.spectators.remove(0);
                    slots.players[idx] = Some(channel.clone());
                    promotions.push((idx, channel));
                }
            }
        }
        for (idx, channel) in &promotions {
            info!("Promoted spectator {} to Player {}", channel.addr(), idx + 1);
            let _ = channel
                .send_text(
                    PacketKind::System,
                    &format!("[INFO] You have been promoted to Player {}.", idx + 1),
                )
                .await;
        }

        // Renumber whoever is still watching.
        let spectators = self.slots.lock().await.spectators.clone();
        for (i, channel) in spectators.iter().enumerate() {
            let _ = channel
                .send_text(
                    PacketKind::System,
                    &format!("[INFO] You are now Spectator {}.", i + 1),
                )
                .await;
        }

        let player_count = self.slots.lock().await.player_count();
        if player_count == MAX_PLAYERS {
            self.set_state(LifecycleState::Idle).await;
            self.gate.set();
            self.begin_countdown().await;
        } else {
            self.set_state(LifecycleState::Idle).await;
            self.gate.set();
        }
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================

    /// Single reader for everything outside a game: watches waiting
    /// connections for 'quit' (or death) while the lifecycle sits in IDLE or
    /// COUNTDOWN. The session owns all player reads once setup begins.
    async fn pregame_watcher(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if !matches!(
                self.state().await,
                LifecycleState::Idle | LifecycleState::Countdown
            ) {
                continue;
            }

            let channels = self.slots.lock().await.all_channels();
            for channel in channels {
                if !matches!(
                    self.state().await,
                    LifecycleState::Idle | LifecycleState::Countdown
                ) {
                    break;
                }
                match channel.recv_if_idle(Duration::from_millis(50)).await {
                    Ok(None) => {}
                    Ok(Some((_, payload))) => {
                        let line = String::from_utf8_lossy(&payload).trim().to_lowercase();
                        if line == "quit" {
                            self.pregame_leave(&channel, "quit").await;
                        } else if !line.is_empty() {
                            let _ = channel
                                .send_text(
                                    PacketKind::System,
                                    "[TIP] The game has not started yet. Type 'quit' to leave.",
                                )
                                .await;
                        }
                    }
                    Err(e) => {
                        debug!("waiting connection {} lost: {}", channel.addr(), e);
                        self.pregame_leave(&channel, "disconnected").await;
                    }
                }
            }
        }
    }

    async fn pregame_leave(&self, channel: &Arc<Channel>, how: &str) {
        let was_player = {
            let slots = self.slots.lock().await;
            slots.player_index_of(channel)
        };
        match was_player {
            Some(idx) => {
                info!("Player {} {} while waiting", idx + 1, how);
                if self.state().await == LifecycleState::Countdown {
                    // Losing a player mid-countdown resets the whole lobby so
                    // player numbering starts over.
                    self.cancel_start().await;
                } else {
                    self.slots.lock().await.players[idx] = None;
                    self.announce_except(
                        channel,
                        &format!("[INFO] Player {} left the lobby.", idx + 1),
                    )
                    .await;
                }
            }
            None => {
                let mut slots = self.slots.lock().await;
                if slots.remove_spectator(channel) {
                    info!("Spectator {} {} while waiting", channel.addr(), how);
                }
            }
        }
    }

    /// Non-destructive liveness sweep while a game is running. Player loss
    /// empties the seat and closes the reconnect gate; the session notices
    /// through the gate and runs the grace window.
    async fn connection_monitor(self: Arc<Self>) {
        loop {
            tokio::time::sleep(PROBE_INTERVAL).await;
            if self.state().await != LifecycleState::InGame {
                continue;
            }

            let (players, spectators) = {
                let slots = self.slots.lock().await;
                (slots.players.clone(), slots.spectators.clone())
            };

            for (idx, player) in players.iter().enumerate() {
                if let Some(channel) = player {
                    if !channel.probe().await {
                        warn!("Player {} lost (probe failed)", idx + 1);
                        self.drop_player(idx, channel).await;
                    }
                }
            }
            for channel in &spectators {
                if !channel.probe().await {
                    info!("Spectator {} lost (probe failed)", channel.addr());
                    self.slots.lock().await.remove_spectator(channel);
                }
            }
        }
    }

    pub(crate) async fn drop_player(&self, idx: usize, channel: &Arc<Channel>) {
        let mut slots = self.slots.lock().await;
        let occupied = slots.players[idx]
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, channel));
        if occupied {
            slots.players[idx] = None;
            self.gate.clear();
        }
    }

    async fn drop_channel(&self, channel: &Arc<Channel>) {
        let mut slots = self.slots.lock().await;
        if let Some(idx) = slots.player_index_of(channel) {
            slots.players[idx] = None;
        } else {
            slots.remove_spectator(channel);
        }
    }

    // =========================================================================
    // MESSAGING
    // =========================================================================

    async fn broadcast(&self, text: &str) {
        let channels = self.slots.lock().await.all_channels();
        for channel in &channels {
            if channel.send_text(PacketKind::System, text).await.is_err() {
                debug!("broadcast to {} failed", channel.addr());
            }
        }
    }

    async fn announce_except(&self, except: &Arc<Channel>, text: &str) {
        let channels = self.slots.lock().await.all_channels();
        for channel in &channels {
            if Arc::ptr_eq(channel, except) {
                continue;
            }
            let _ = channel.send_text(PacketKind::System, text).await;
        }
    }
}
