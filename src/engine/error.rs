use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Lost the race for a window: it intersects the given active reservation.
    /// Recoverable — the caller should re-query slots and retry.
    SlotConflict(Ulid),
    InvalidInput(&'static str),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// The instructor's commit lock could not be taken within the bound.
    /// Transient and distinct from a conflict; the caller may retry as-is.
    Timeout,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotConflict(id) => {
                write!(f, "SLOT_ALREADY_BOOKED: window intersects active reservation {id}")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {} -> {}", from.as_str(), to.as_str())
            }
            EngineError::Timeout => {
                write!(f, "timed out waiting for instructor commit lock; retry")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
