//! Session engine
//!
//! Drives one game between the two seated players: the concurrent ship-
//! placement dialogue, then the turn loop with its bounded move timer, and
//! the reconnect grace window whenever a seat empties mid-game. Spectators
//! receive scrubbed state after every resolved shot.
//!
//! All waits are select-style over (deadline, input); the session task is
//! the only reader of a player's channel while the game runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{
    MOVE_REMINDERS, MOVE_TIMEOUT, RECONNECT_GRACE, RECONNECT_REMINDER, SETUP_REMINDERS,
    SETUP_TIMEOUT,
};
use crate::game::{parse_coord, Board, Orientation};
use crate::game::board::Shot;
use crate::game::coord::format_coord;
use crate::net::{Channel, PacketKind, UiMode};
use crate::server::lobby::{Lobby, ReconnectGate, Slots};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Zero-based index of the winning seat.
    Winner(usize),
    /// Both seats emptied or forfeited; nobody won.
    Cancelled,
}

/// How one player's setup dialogue ended.
enum SetupResult {
    Ready(Board),
    Quit,
    Lost,
}

/// How one awaited move ended.
enum MoveOutcome {
    Fired(usize, usize, String),
    Timeout,
    Quit,
    PeerLost,
}

enum GateOutcome {
    Resumed,
    Ended(SessionOutcome),
}

/// Deadline plus a descending ladder of seconds-remaining reminders.
struct TurnTimer {
    deadline: Instant,
    thresholds: Vec<u64>,
}

impl TurnTimer {
    fn new(budget: Duration, thresholds: &[u64]) -> Self {
        let budget_secs = budget.as_secs();
        Self {
            deadline: Instant::now() + budget,
            thresholds: thresholds
                .iter()
                .copied()
                .filter(|&t| t <= budget_secs)
                .collect(),
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// The reminder that just came due, if any. When the task wakes late and
    /// several thresholds were crossed at once, the closest one fires and the
    /// stale ones are dropped.
    fn due_reminder(&mut self) -> Option<u64> {
        let remaining = self.remaining().as_secs();
        let crossed = self.thresholds.iter().filter(|&&t| t >= remaining).count();
        if crossed == 0 {
            return None;
        }
        let fired = self.thresholds[crossed - 1];
        self.thresholds.drain(..crossed);
        Some(fired)
    }

    /// Sleep until the next reminder or the deadline, whichever is sooner.
    fn next_wakeup(&self) -> Duration {
        let until_deadline = self.remaining();
        match self.thresholds.first() {
            Some(&t) => until_deadline
                .saturating_sub(Duration::from_secs(t))
                .min(until_deadline),
            None => until_deadline,
        }
    }
}

pub struct Session {
    slots: Arc<Mutex<Slots>>,
    gate: Arc<ReconnectGate>,
    boards: [Board; 2],
    current: usize,
}

impl Session {
    pub fn new(slots: Arc<Mutex<Slots>>, gate: Arc<ReconnectGate>) -> Self {
        Self {
            slots,
            gate,
            boards: [Board::default(), Board::default()],
            current: 0,
        }
    }

    pub async fn run(mut self, lobby: &Arc<Lobby>) -> SessionOutcome {
        info!("Session starting setup phase");
        match self.run_setup().await {
            Ok(boards) => self.boards = boards,
            Err(outcome) => {
                self.announce_end(&outcome).await;
                return outcome;
            }
        }

        lobby.mark_in_game().await;
        info!("Session entering play phase");
        let outcome = self.play().await;
        self.announce_end(&outcome).await;
        outcome
    }

    // =========================================================================
    // SETUP PHASE
    // =========================================================================

    async fn run_setup(&mut self) -> Result<[Board; 2], SessionOutcome> {
        let channels = {
            let slots = self.slots.lock().await;
            (slots.players[0].clone(), slots.players[1].clone())
        };
        let (Some(chan0), Some(chan1)) = channels else {
            return Err(SessionOutcome::Cancelled);
        };

        // Run both dialogues concurrently. The select loop ends either with
        // both fleets placed or with the seat index that bailed out early.
        // Messaging happens only after both futures are dropped: a pinned
        // but unpolled setup future still owns its channel's read half, and
        // a reliable send needs that half for its ACK wait.
        let mut boards: [Option<Board>; 2] = [None, None];
        let early: Option<(usize, SetupResult)> = {
            let setup0 = setup_player(chan0, 0);
            let setup1 = setup_player(chan1, 1);
            tokio::pin!(setup0, setup1);

            loop {
                if boards[0].is_some() && boards[1].is_some() {
                    break None;
                }
                tokio::select! {
                    r = &mut setup0, if boards[0].is_none() => {
                        match r {
                            SetupResult::Ready(board) => boards[0] = Some(board),
                            other => break Some((0, other)),
                        }
                    }
                    r = &mut setup1, if boards[1].is_none() => {
                        match r {
                            SetupResult::Ready(board) => boards[1] = Some(board),
                            other => break Some((1, other)),
                        }
                    }
                }
            }
        };

        match early {
            None => match (boards[0].take(), boards[1].take()) {
                (Some(b0), Some(b1)) => Ok([b0, b1]),
                _ => Err(SessionOutcome::Cancelled),
            },
            Some((idx, result)) => Err(self.end_setup_early(idx, result).await),
        }
    }

    /// Ending a setup early (quit or disconnect) hands the game to the other
    /// player on the spot.
    async fn end_setup_early(&self, idx: usize, result: SetupResult) -> SessionOutcome {
        let how = match result {
            SetupResult::Quit => "forfeited",
            _ => "disconnected",
        };
        info!("Player {} {} during setup", idx + 1, how);
        let other = 1 - idx;
        self.drop_seat(idx).await;
        let _ = self
            .send_player(
                other,
                PacketKind::GameUpdate,
                &format!("Your opponent {} during setup. You win!", how),
            )
            .await;
        self.broadcast_spectators(
            PacketKind::System,
            &format!("[INFO] Player {} {} during setup.", idx + 1, how),
        )
        .await;
        SessionOutcome::Winner(other)
    }

    // =========================================================================
    // PLAY PHASE
    // =========================================================================

    async fn play(&mut self) -> SessionOutcome {
        self.broadcast_players(
            PacketKind::GameUpdate,
            "[INFO] GAME PHASE: All ships have been placed. Game is starting!",
        )
        .await;
        self.broadcast_spectators(
            PacketKind::System,
            "[INFO] GAME PHASE: The game is starting!",
        )
        .await;

        loop {
            match self.await_both_connected().await {
                GateOutcome::Resumed => {}
                GateOutcome::Ended(outcome) => return outcome,
            }

            let current = self.current;
            if self.prompt(current).await.is_err() {
                // Somebody's channel died while prompting; the gate is
                // already closed, loop back into the grace window.
                continue;
            }

            match self.await_move(current).await {
                MoveOutcome::Fired(row, col, coord) => {
                    if let Some(winner) = self.resolve(current, row, col, &coord).await {
                        return SessionOutcome::Winner(winner);
                    }
                    self.current = 1 - current;
                }
                MoveOutcome::Timeout => {
                    let _ = self
                        .send_player(
                            current,
                            PacketKind::GameUpdate,
                            "[INFO] Timer expired! Your turn is over.",
                        )
                        .await;
                    let notice = format!(
                        "[INFO] Player {} timed out and gave up their turn.",
                        current + 1
                    );
                    let _ = self
                        .send_player(1 - current, PacketKind::GameUpdate, &notice)
                        .await;
                    self.broadcast_spectators(PacketKind::System, &notice).await;
                    self.current = 1 - current;
                }
                MoveOutcome::Quit => {
                    let other = 1 - current;
                    info!("Player {} forfeited", current + 1);
                    let _ = self
                        .send_player(current, PacketKind::GameUpdate, "[INFO] You forfeited.")
                        .await;
                    let _ = self
                        .send_player(
                            other,
                            PacketKind::GameUpdate,
                            "Your opponent forfeited. You win!",
                        )
                        .await;
                    self.broadcast_spectators(
                        PacketKind::System,
                        &format!(
                            "[INFO] Player {} forfeited. Player {} wins!",
                            current + 1,
                            other + 1
                        ),
                    )
                    .await;
                    self.drop_seat(current).await;
                    return SessionOutcome::Winner(other);
                }
                MoveOutcome::PeerLost => {
                    // Seat already emptied; grace window runs next iteration
                    // with the turn kept on the disconnected side.
                }
            }
        }
    }

    /// Block while a seat is empty, reminding the survivors, until the seat
    /// refills or the grace period hands the game to the other player.
    async fn await_both_connected(&self) -> GateOutcome {
        if self.gate.is_open() {
            return GateOutcome::Resumed;
        }

        let (missing, remaining) = {
            let slots = self.slots.lock().await;
            let missing = slots.free_player_slot();
            (missing, slots.player_count())
        };
        if remaining == 0 {
            return GateOutcome::Ended(SessionOutcome::Cancelled);
        }
        let Some(missing) = missing else {
            // Gate closed but both seats full: a reconnect raced us.
            return GateOutcome::Resumed;
        };
        let other = 1 - missing;

        let waiting = format!("[INFO] Waiting for Player {} to reconnect...", missing + 1);
        let _ = self.send_player(other, PacketKind::GameUpdate, &waiting).await;
        self.broadcast_spectators(PacketKind::System, &waiting).await;

        let deadline = Instant::now() + RECONNECT_GRACE;
        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("Player {} did not reconnect; Player {} wins", missing + 1, other + 1);
                let _ = self
                    .send_player(
                        other,
                        PacketKind::GameUpdate,
                        "[INFO] Opponent did not reconnect in time. You win by default!",
                    )
                    .await;
                self.broadcast_spectators(
                    PacketKind::System,
                    &format!(
                        "[INFO] Player {} did not reconnect. Player {} wins by default!",
                        missing + 1,
                        other + 1
                    ),
                )
                .await;
                return GateOutcome::Ended(SessionOutcome::Winner(other));
            }

            let reminder_in = RECONNECT_REMINDER.min(deadline - now);
            tokio::select! {
                _ = self.gate.wait_open() => {
                    debug!("reconnect gate reopened");
                    return GateOutcome::Resumed;
                }
                _ = tokio::time::sleep(reminder_in) => {
                    if Instant::now() < deadline {
                        let _ = self.send_player(other, PacketKind::GameUpdate, &waiting).await;
                        self.broadcast_spectators(PacketKind::System, &waiting).await;
                    }
                }
            }
        }
    }

    /// Show the current player both boards and prompt; tell the opponent to
    /// wait. Any send failure empties the dead seat via the channel error.
    async fn prompt(&self, current: usize) -> Result<(), ()> {
        let other = 1 - current;

        self.send_ui_mode(current, UiMode::Turn).await;
        self.send_ui_mode(other, UiMode::Wait).await;

        let own = format!("Your board:\n{}", self.boards[current].render(true));
        self.send_player(current, PacketKind::BoardUpdate, &own).await?;

        let opponent_view = format!(
            "Opponent's board:\n{}",
            self.boards[other].render(false)
        );
        self.send_player(current, PacketKind::BoardUpdate, &opponent_view)
            .await?;

        self.send_player(
            current,
            PacketKind::GameUpdate,
            "[INFO] It's your turn! Enter a coordinate to fire at (e.g. B5):",
        )
        .await?;

        // The opponent staying unreachable must not stall the turn; their
        // seat empties and the grace window picks it up on the next loop.
        let _ = self
            .send_player(
                other,
                PacketKind::GameUpdate,
                &format!("[INFO] Waiting for Player {} to make their move...", current + 1),
            )
            .await;

        Ok(())
    }

    /// One bounded-time move. Invalid coordinates and already-shot cells
    /// re-prompt without consuming the turn or resetting the timer.
    async fn await_move(&self, current: usize) -> MoveOutcome {
        let mut timer = TurnTimer::new(MOVE_TIMEOUT, &MOVE_REMINDERS);

        loop {
            if timer.expired() {
                return MoveOutcome::Timeout;
            }
            if !self.gate.is_open() {
                // The monitor emptied a seat while we waited. Checked only
                // between recv slices: cancelling a read mid-frame would
                // desync the stream.
                return MoveOutcome::PeerLost;
            }

            // Short slices: the reminder ladder caps each wait at a few
            // seconds, which also bounds how late we notice the gate.
            let line = self.recv_player_line(current, timer.next_wakeup()).await;

            let line = match line {
                Err(()) => {
                    self.mark_player_lost(current).await;
                    return MoveOutcome::PeerLost;
                }
                Ok(None) => {
                    if timer.expired() {
                        return MoveOutcome::Timeout;
                    }
                    if let Some(seconds) = timer.due_reminder() {
                        let _ = self
                            .send_player(
                                current,
                                PacketKind::GameUpdate,
                                &format!("[INFO] Enter a coordinate ({}s remaining)", seconds),
                            )
                            .await;
                    }
                    continue;
                }
                Ok(Some(line)) => line,
            };

            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case("quit") {
                return MoveOutcome::Quit;
            }

            match parse_coord(trimmed) {
                Err(e) => {
                    let _ = self
                        .send_player(current, PacketKind::GameUpdate, &e.to_string())
                        .await;
                }
                Ok((row, col)) => {
                    if self.boards[1 - current].is_shot(row, col) {
                        let _ = self
                            .send_player(
                                current,
                                PacketKind::GameUpdate,
                                "[INFO] Invalid move. You've already fired at that location.",
                            )
                            .await;
                        continue;
                    }
                    return MoveOutcome::Fired(row, col, format_coord(row, col));
                }
            }
        }
    }

    /// Apply a fresh shot and fan the result out to both players and the
    /// gallery. Returns the winner when this shot ends the game.
    async fn resolve(
        &mut self,
        current: usize,
        row: usize,
        col: usize,
        coord: &str,
    ) -> Option<usize> {
        let other = 1 - current;
        let (shot, sunk) = self.boards[other].fire_at(row, col);

        match (shot, sunk) {
            (Shot::Hit, Some(ship)) => {
                let _ = self
                    .send_player(
                        current,
                        PacketKind::GameUpdate,
                        &format!("HIT! You sank the {}!", ship),
                    )
                    .await;
                let _ = self
                    .send_player(
                        other,
                        PacketKind::GameUpdate,
                        &format!("Your {} was sunk!", ship),
                    )
                    .await;
                self.broadcast_spectators(
                    PacketKind::GameUpdate,
                    &format!(
                        "Player {} sank Player {}'s {}!",
                        current + 1,
                        other + 1,
                        ship
                    ),
                )
                .await;
            }
            (Shot::Hit, None) => {
                let _ = self
                    .send_player(current, PacketKind::GameUpdate, "HIT!")
                    .await;
                let _ = self
                    .send_player(
                        other,
                        PacketKind::GameUpdate,
                        &format!("Your ship was hit at {}!", coord),
                    )
                    .await;
                self.broadcast_spectators(
                    PacketKind::GameUpdate,
                    &format!("Player {} hit a ship at {}!", current + 1, coord),
                )
                .await;
            }
            (Shot::Miss, _) => {
                let _ = self
                    .send_player(current, PacketKind::GameUpdate, "MISS!")
                    .await;
                let _ = self
                    .send_player(
                        other,
                        PacketKind::GameUpdate,
                        &format!("Your opponent fired at {} and missed.", coord),
                    )
                    .await;
                self.broadcast_spectators(
                    PacketKind::GameUpdate,
                    &format!("Player {} missed at {}!", current + 1, coord),
                )
                .await;
            }
            (Shot::AlreadyShot, _) => {
                // Pre-checked in await_move; nothing to do.
                warn!("already-shot cell {} reached resolution", coord);
                return None;
            }
        }

        self.broadcast_game_state().await;

        if self.boards[other].all_sunk() {
            info!("Player {} wins", current + 1);
            let _ = self
                .send_player(
                    current,
                    PacketKind::GameUpdate,
                    "Congratulations! You've sunk all your opponent's ships. You win!",
                )
                .await;
            let _ = self
                .send_player(
                    other,
                    PacketKind::GameUpdate,
                    "All your ships have been sunk. Game over!",
                )
                .await;
            self.broadcast_spectators(
                PacketKind::GameUpdate,
                &format!("Player {} wins the game!", current + 1),
            )
            .await;
            return Some(current);
        }
        None
    }

    // =========================================================================
    // PEERS & MESSAGING
    // =========================================================================

    async fn player_channel(&self, idx: usize) -> Option<Arc<Channel>> {
        self.slots.lock().await.players[idx].clone()
    }

    /// Send to a seat; a failure empties the seat and closes the gate.
    async fn send_player(&self, idx: usize, kind: PacketKind, text: &str) -> Result<(), ()> {
        let Some(channel) = self.player_channel(idx).await else {
            return Err(());
        };
        match channel.send_text(kind, text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("send to Player {} failed: {}", idx + 1, e);
                self.drop_seat(idx).await;
                self.gate.clear();
                Err(())
            }
        }
    }

    async fn send_ui_mode(&self, idx: usize, mode: UiMode) {
        let _ = self
            .send_player(idx, PacketKind::UiMode, mode.token())
            .await;
    }

    async fn recv_player_line(
        &self,
        idx: usize,
        timeout: Duration,
    ) -> Result<Option<String>, ()> {
        let Some(channel) = self.player_channel(idx).await else {
            return Err(());
        };
        match channel.recv(timeout).await {
            Ok(Some((_, payload))) => {
                Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                debug!("recv from Player {} failed: {}", idx + 1, e);
                Err(())
            }
        }
    }

    async fn mark_player_lost(&self, idx: usize) {
        info!("Player {} lost mid-game", idx + 1);
        self.drop_seat(idx).await;
        self.gate.clear();
        let notice = format!("[INFO] Player {} disconnected.", idx + 1);
        let _ = self.send_player(1 - idx, PacketKind::GameUpdate, &notice).await;
        self.broadcast_spectators(PacketKind::System, &notice).await;
    }

    async fn drop_seat(&self, idx: usize) {
        self.slots.lock().await.players[idx] = None;
    }

    async fn broadcast_players(&self, kind: PacketKind, text: &str) {
        for idx in 0..2 {
            let _ = self.send_player(idx, kind, text).await;
        }
    }

    /// Spectators are write-only; one that stops taking messages is removed
    /// and the rest renumber implicitly.
    async fn broadcast_spectators(&self, kind: PacketKind, text: &str) {
        let spectators = self.slots.lock().await.spectators.clone();
        for channel in &spectators {
            if channel.send_text(kind, text).await.is_err() {
                debug!("spectator {} dropped during broadcast", channel.addr());
                let mut slots = self.slots.lock().await;
                slots.spectators.retain(|c| !Arc::ptr_eq(c, channel));
            }
        }
    }

    /// Scrubbed two-board view for the gallery: hits and misses only.
    async fn broadcast_game_state(&self) {
        let view = format!(
            "Player 1's board:\n{}\nPlayer 2's board:\n{}",
            self.boards[0].render(false),
            self.boards[1].render(false)
        );
        self.broadcast_spectators(PacketKind::GameState, &view).await;
    }

    async fn announce_end(&self, outcome: &SessionOutcome) {
        debug!("announcing session end: {:?}", outcome);
        for idx in 0..2 {
            self.send_ui_mode(idx, UiMode::Ended).await;
        }
        let spectators = self.slots.lock().await.spectators.clone();
        for channel in &spectators {
            let _ = channel
                .send_text(PacketKind::UiMode, UiMode::Ended.token())
                .await;
        }
    }
}

/// One player's ship-placement dialogue, bounded by the setup timer. Runs
/// against a snapshot of the seat's channel: there is no reconnection during
/// setup, a disconnect is a forfeit.
async fn setup_player(channel: Arc<Channel>, idx: usize) -> SetupResult {
    let mut board = Board::default();
    let mut timer = TurnTimer::new(SETUP_TIMEOUT, &SETUP_REMINDERS);

    let intro = "[INFO] SETUP PHASE: Place your ships. Type 'RANDOM' for random placement or 'MANUAL' for manual placement.\n\
                 [INFO] You have 1 minute to place your ships.";
    if channel.send_text(PacketKind::UiMode, UiMode::Setup.token()).await.is_err() {
        return SetupResult::Lost;
    }
    if channel.send_text(PacketKind::GameUpdate, intro).await.is_err() {
        return SetupResult::Lost;
    }

    let mut manual_mode = false;
    let mut prompted = false;

    loop {
        if timer.expired() {
            board.place_remaining_randomly();
            let done = format!(
                "[TIME] Time's up! Placing ships randomly.\n[INFO] Ships placed randomly due to time limit.\n{}",
                board.render(true)
            );
            if channel.send_text(PacketKind::GameUpdate, &done).await.is_err() {
                return SetupResult::Lost;
            }
            return SetupResult::Ready(board);
        }

        if manual_mode && !prompted {
            // Ships are placed in fleet order; prompt for the next one.
            if let Some(&(name, size)) = board.missing_ships().first() {
                let prompt = format!(
                    "{}\nPlacing {} (size {}). Enter starting coordinate and orientation (e.g., 'A1 H' or 'B5 V'):",
                    board.render(true),
                    name,
                    size
                );
                if channel.send_text(PacketKind::GameUpdate, &prompt).await.is_err() {
                    return SetupResult::Lost;
                }
                prompted = true;
            }
        }

        let line = match channel.recv(timer.next_wakeup()).await {
            Err(_) => return SetupResult::Lost,
            Ok(None) => {
                if let Some(seconds) = timer.due_reminder() {
                    let text = format!(
                        "[TIME] {} seconds remaining to place your ships!",
                        seconds
                    );
                    if channel.send_text(PacketKind::GameUpdate, &text).await.is_err() {
                        return SetupResult::Lost;
                    }
                }
                continue;
            }
            Ok(Some((_, payload))) => String::from_utf8_lossy(&payload).into_owned(),
        };
        let line = line.trim().to_string();

        if line.eq_ignore_ascii_case("quit") {
            return SetupResult::Quit;
        }

        if !manual_mode {
            if line.eq_ignore_ascii_case("random") {
                board.place_remaining_randomly();
                let done = format!("[INFO] Ships placed randomly.\n{}", board.render(true));
                if channel.send_text(PacketKind::GameUpdate, &done).await.is_err() {
                    return SetupResult::Lost;
                }
                break;
            } else if line.eq_ignore_ascii_case("manual") {
                if channel
                    .send_text(PacketKind::GameUpdate, "[INFO] Placing ships manually:")
                    .await
                    .is_err()
                {
                    return SetupResult::Lost;
                }
                manual_mode = true;
                prompted = false;
            } else {
                let tip = "[TIP] Invalid option. Please type 'RANDOM' for random placement or 'MANUAL' for manual placement.";
                if channel.send_text(PacketKind::GameUpdate, tip).await.is_err() {
                    return SetupResult::Lost;
                }
            }
            continue;
        }

        match place_one_ship(&mut board, &line) {
            Ok(name) => {
                let msg = format!("[INFO] {} placed successfully.", name);
                if channel.send_text(PacketKind::GameUpdate, &msg).await.is_err() {
                    return SetupResult::Lost;
                }
                prompted = false;
                if board.missing_ships().is_empty() {
                    let done = format!(
                        "{}\n[INFO] All ships placed successfully.",
                        board.render(true)
                    );
                    if channel.send_text(PacketKind::GameUpdate, &done).await.is_err() {
                        return SetupResult::Lost;
                    }
                    break;
                }
            }
            Err(tip) => {
                if channel.send_text(PacketKind::GameUpdate, &tip).await.is_err() {
                    return SetupResult::Lost;
                }
                // Re-show the board and prompt for the same ship.
                prompted = false;
            }
        }
    }

    let wait_note = format!(
        "[INFO] Your ships are placed. Waiting for Player {} to finish placing their ships...",
         2 - idx
    );
    if channel.send_text(PacketKind::GameUpdate, &wait_note).await.is_err() {
        return SetupResult::Lost;
    }
    SetupResult::Ready(board)
}

/// Parse "COORD ORIENT" and place the next missing ship.
fn place_one_ship(board: &mut Board, line: &str) -> Result<&'static str, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 2 {
        return Err("[TIP] Invalid format. Use 'COORD ORIENTATION' (e.g., 'A1 H')".to_string());
    }

    let (row, col) = parse_coord(parts[0]).map_err(|e| e.to_string())?;
    let Some(orientation) = Orientation::from_token(parts[1]) else {
        return Err("[TIP] Invalid orientation. Please enter 'H' or 'V'.".to_string());
    };

    let missing = board.missing_ships();
    let Some(&(name, size)) = missing.first() else {
        return Err("[TIP] All ships are already placed.".to_string());
    };

    if !board.can_place(row, col, size, orientation) {
        return Err("[TIP] Cannot place ship there. Try again.".to_string());
    }
    board.place(name, row, col, size, orientation);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_one_ship_walks_the_fleet() {
        let mut board = Board::default();
        assert_eq!(place_one_ship(&mut board, "A1 H").unwrap(), "Carrier");
        assert_eq!(place_one_ship(&mut board, "B1 H").unwrap(), "Battleship");
        assert_eq!(place_one_ship(&mut board, "C1 H").unwrap(), "Cruiser");
        assert_eq!(place_one_ship(&mut board, "D1 V").unwrap(), "Submarine");
        assert_eq!(place_one_ship(&mut board, "E5 H").unwrap(), "Destroyer");
        assert!(board.missing_ships().is_empty());
    }

    #[test]
    fn place_one_ship_rejects_bad_input() {
        let mut board = Board::default();
        assert!(place_one_ship(&mut board, "A1").is_err());
        assert!(place_one_ship(&mut board, "A1 X").is_err());
        assert!(place_one_ship(&mut board, "Z9 H").is_err());
        // Carrier is 5 long; starting at column 7 runs off the board.
        assert!(place_one_ship(&mut board, "A7 H").is_err());
        // Nothing was placed by the failures.
        assert_eq!(board.missing_ships().len(), 5);
    }

    #[test]
    fn place_one_ship_rejects_overlap() {
        let mut board = Board::default();
        place_one_ship(&mut board, "A1 H").unwrap();
        let err = place_one_ship(&mut board, "A1 V").unwrap_err();
        assert!(err.contains("Cannot place"));
    }

    #[test]
    fn turn_timer_reminder_ladder() {
        let mut timer = TurnTimer::new(Duration::from_secs(20), &MOVE_REMINDERS);
        // Nothing due immediately: 20s remain, largest threshold is 15.
        assert_eq!(timer.due_reminder(), None);

        // Force the deadline close enough that 15 and 10 are both crossed;
        // only the nearest fires and the stale one is discarded.
        timer.deadline = Instant::now() + Duration::from_secs(9);
        assert_eq!(timer.due_reminder(), Some(10));
        assert_eq!(timer.due_reminder(), None);

        timer.deadline = Instant::now() + Duration::from_millis(400);
        assert_eq!(timer.due_reminder(), Some(1));
        assert_eq!(timer.due_reminder(), None);
    }

    #[test]
    fn turn_timer_filters_oversized_thresholds() {
        let timer = TurnTimer::new(Duration::from_secs(10), &[15, 10, 5]);
        assert_eq!(timer.thresholds, vec![10, 5]);
    }

    #[test]
    fn turn_timer_expiry() {
        let mut timer = TurnTimer::new(Duration::from_secs(5), &[]);
        assert!(!timer.expired());
        timer.deadline = Instant::now();
        assert!(timer.expired());
    }
}
