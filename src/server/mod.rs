//! Server side: the lobby/lifecycle state machine and the session engine it
//! hands each game to.

pub mod lobby;
pub mod session;

pub use lobby::{LifecycleState, Lobby, ReconnectGate, Slots};
pub use session::{Session, SessionOutcome};
