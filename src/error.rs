//! Error taxonomy shared across the session layer.

use thiserror::Error;

/// Everything an inbound action can fail with. Recoverable variants never
/// leave a session half-applied: an action either commits fully or is
/// rejected with status, board and turn untouched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GameError {
    /// Malformed input, rejected before the engine is consulted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A move the rule engine refuses.
    #[error("illegal move: {0}")]
    RuleViolation(String),

    #[error("it is not your turn")]
    OutOfTurn,

    #[error("room {0} not found")]
    NotFound(String),

    #[error("room is full")]
    RoomFull,

    #[error("you are not in this room")]
    NotInSession,

    /// Internal retries exhausted; the caller may retry later.
    #[error("temporary failure: {0}")]
    Transient(String),

    /// Corrupted persisted state; the session is left for eviction.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl GameError {
    /// Stable machine-readable tag carried on error events.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::Validation(_) => "validation",
            GameError::RuleViolation(_) | GameError::OutOfTurn => "rule-violation",
            GameError::NotFound(_) => "not-found",
            GameError::RoomFull => "capacity",
            GameError::NotInSession => "not-in-session",
            GameError::Transient(_) => "transient",
            GameError::Fatal(_) => "fatal",
        }
    }
}
