use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Actor, BookingStatus};

/// Broad class of a failure; the wire layer maps these to SQLSTATEs and
/// callers use them to decide between "fix your input" and "try again".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recoverable, user-facing: the selection itself is wrong or incomplete.
    Selection,
    /// Recoverable: the request shape is wrong.
    Validation,
    /// Recoverable, surfaced distinctly: the slot was taken concurrently.
    Conflict,
    /// Integration error: a status change outside the lifecycle graph.
    Transition,
    /// Retryable: the durable store misbehaved; in-memory state unchanged.
    Store,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    SlotTaken {
        date: NaiveDate,
        slot_label: String,
        holder: Ulid,
    },
    DayNotOpen {
        coach_id: Ulid,
        date: NaiveDate,
    },
    DayInPast(NaiveDate),
    UnknownSlot(String),
    InvalidMonth {
        year: i32,
        month: u32,
    },
    NoSessions,
    DuplicateSession {
        date: NaiveDate,
        slot_label: String,
    },
    MissingClient,
    NoCoachSelected,
    NoDaySelected,
    NoSlotSelected,
    NoPaymentMethod,
    NotSelfScheduled(Ulid),
    HasActiveBookings(Ulid),
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    ActorNotAllowed {
        from: BookingStatus,
        to: BookingStatus,
        actor: Actor,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DayNotOpen { .. }
            | EngineError::DayInPast(_)
            | EngineError::UnknownSlot(_)
            | EngineError::InvalidMonth { .. }
            | EngineError::NoCoachSelected
            | EngineError::NoDaySelected
            | EngineError::NoSlotSelected
            | EngineError::NoPaymentMethod => ErrorKind::Selection,
            EngineError::NotFound(_)
            | EngineError::AlreadyExists(_)
            | EngineError::NoSessions
            | EngineError::DuplicateSession { .. }
            | EngineError::MissingClient
            | EngineError::NotSelfScheduled(_)
            | EngineError::HasActiveBookings(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::SlotTaken { .. } => ErrorKind::Conflict,
            EngineError::IllegalTransition { .. } | EngineError::ActorNotAllowed { .. } => {
                ErrorKind::Transition
            }
            EngineError::WalError(_) => ErrorKind::Store,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotTaken {
                date,
                slot_label,
                holder,
            } => write!(
                f,
                "slot taken: {slot_label} on {date} held by booking {holder}"
            ),
            EngineError::DayNotOpen { coach_id, date } => {
                write!(f, "day not open: {date} for coach {coach_id}")
            }
            EngineError::DayInPast(date) => write!(f, "day in the past: {date}"),
            EngineError::UnknownSlot(label) => write!(f, "unknown slot: {label}"),
            EngineError::InvalidMonth { year, month } => {
                write!(f, "invalid month: {year}-{month}")
            }
            EngineError::NoSessions => write!(f, "booking has no sessions"),
            EngineError::DuplicateSession { date, slot_label } => {
                write!(f, "duplicate session in request: {slot_label} on {date}")
            }
            EngineError::MissingClient => write!(f, "missing client identity"),
            EngineError::NoCoachSelected => write!(f, "no coach selected"),
            EngineError::NoDaySelected => write!(f, "no day selected"),
            EngineError::NoSlotSelected => write!(f, "no slot selected"),
            EngineError::NoPaymentMethod => write!(f, "no payment method chosen"),
            EngineError::NotSelfScheduled(id) => {
                write!(f, "coach {id} does not keep an availability calendar")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot remove coach {id}: has active bookings")
            }
            EngineError::IllegalTransition { from, to } => write!(
                f,
                "illegal transition: {} -> {}",
                from.label(),
                to.label()
            ),
            EngineError::ActorNotAllowed { from, to, actor } => write!(
                f,
                "actor {} may not move {} -> {}",
                actor.label(),
                from.label(),
                to.label()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
