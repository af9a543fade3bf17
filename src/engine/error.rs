use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or out-of-range input: unknown time label, past date,
    /// missing or oversized field, unknown venue.
    Validation(String),
    /// The (date, time) pair is already held by a committed entry.
    SlotConflict {
        date: NaiveDate,
        time: String,
        occupant: Ulid,
    },
    /// The booking request is no longer pending.
    InvalidState { id: Ulid, status: BookingStatus },
    NotFound(Ulid),
    /// Public booking intake is switched off.
    BookingsClosed,
    LimitExceeded(&'static str),
    WalError(String),
    /// A write task died before reporting back.
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::SlotConflict { .. } => "slot_conflict",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::NotFound(_) => "not_found",
            EngineError::BookingsClosed => "bookings_closed",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::SlotConflict { date, time, occupant } => {
                write!(f, "{date} {time} is already taken by {occupant}")
            }
            EngineError::InvalidState { id, status } => {
                write!(f, "booking {id} is {status}, not Pending")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::BookingsClosed => {
                write!(f, "online booking is temporarily unavailable")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
