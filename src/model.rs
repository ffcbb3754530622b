use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type.
pub type Ms = i64;

/// Whole-currency-unit amount. This domain has no fractional prices.
pub type Money = i64;

/// Coach category — decides the availability policy and the default price.
/// Open enumeration: a new tier is a new variant here plus a row in
/// `pricing`, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoachCategory {
    /// Bookable on any non-past date.
    General,
    /// Bookable only on dates the coach has explicitly opened.
    SelfScheduled,
}

impl CoachCategory {
    pub fn label(&self) -> &'static str {
        match self {
            CoachCategory::General => "general",
            CoachCategory::SelfScheduled => "self_scheduled",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "general" => Some(CoachCategory::General),
            "self_scheduled" => Some(CoachCategory::SelfScheduled),
            _ => None,
        }
    }
}

/// Declared at creation; decides the initial lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Online,
}

impl PaymentMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Online => "online",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "online" => Some(PaymentMethod::Online),
            _ => None,
        }
    }
}

/// Who is asking for a transition. Gating lives in `engine::lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Client,
    Coach,
    Operator,
    System,
}

impl Actor {
    pub fn label(&self) -> &'static str {
        match self {
            Actor::Client => "client",
            Actor::Coach => "coach",
            Actor::Operator => "operator",
            Actor::System => "system",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Actor::Client),
            "coach" => Some(Actor::Coach),
            "operator" => Some(Actor::Operator),
            "system" => Some(Actor::System),
            _ => None,
        }
    }
}

/// Booking lifecycle states. Transitions between them are owned by
/// `engine::lifecycle`; nothing else writes `Booking::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created with cash payment; waiting for the coach to accept.
    PendingConfirmation,
    /// Created with online payment; waiting for capture.
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Terminal states take no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Active bookings hold their slots; terminal ones never block.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::PendingConfirmation => "pending_confirmation",
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "pending_confirmation" => Some(BookingStatus::PendingConfirmation),
            "pending_payment" => Some(BookingStatus::PendingPayment),
            "confirmed" => Some(BookingStatus::Confirmed),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// One reserved window. Immutable once created; always nested in a Booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub date: NaiveDate,
    /// Catalog label, the wire identity of the window.
    pub slot_label: String,
    pub duration_minutes: u32,
}

impl Session {
    /// Two sessions collide when they name the same day and window.
    pub fn collides(&self, other: &Session) -> bool {
        self.date == other.date && self.slot_label == other.slot_label
    }
}

/// What a caller asks for. Duration is stamped from the coach record at
/// creation, so requests carry only the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub date: NaiveDate,
    pub slot_label: String,
}

/// The central record. Never physically deleted; cancellation is a
/// terminal status, not removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub client_id: Ulid,
    /// Non-empty. The composer creates single-session bookings; the
    /// engine validates and prices any length.
    pub sessions: Vec<Session>,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
    pub status: BookingStatus,
    pub created_at: Ms,
    /// Role that moved the booking into `Confirmed`.
    pub approved_by: Option<Actor>,
    pub started_at: Option<Ms>,
    pub completed_at: Option<Ms>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// True if any session names `(date, slot_label)`.
    pub fn holds_slot(&self, date: NaiveDate, slot_label: &str) -> bool {
        self.sessions
            .iter()
            .any(|s| s.date == date && s.slot_label == slot_label)
    }
}

/// Everything the engine knows about one coach. Lives behind the coach's
/// RwLock in the engine map; holding the write lock is what makes
/// conflict-check plus insert a single step.
#[derive(Debug, Clone)]
pub struct CoachState {
    pub id: Ulid,
    pub category: CoachCategory,
    pub price_per_session: Money,
    pub session_minutes: u32,
    /// Dates a self-scheduled coach has opened. Empty for general coaches.
    pub open_dates: BTreeSet<NaiveDate>,
    /// Append-ordered; `created_at` is monotonic under the write lock.
    pub bookings: Vec<Booking>,
}

impl CoachState {
    pub fn new(
        id: Ulid,
        category: CoachCategory,
        price_per_session: Money,
        session_minutes: u32,
    ) -> Self {
        Self {
            id,
            category,
            price_per_session,
            session_minutes,
            open_dates: BTreeSet::new(),
            bookings: Vec::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Active booking currently holding `(date, slot)`, if any.
    pub fn slot_holder(&self, date: NaiveDate, slot_label: &str) -> Option<Ulid> {
        self.bookings
            .iter()
            .find(|b| b.is_active() && b.holds_slot(date, slot_label))
            .map(|b| b.id)
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.is_active())
    }
}

/// The event types — flat, one record per mutation. This is the WAL
/// format. `BookingCreated` carries the whole record so compaction can
/// re-emit bookings with their current status and stamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CoachRegistered {
        id: Ulid,
        category: CoachCategory,
        price_per_session: Money,
        session_minutes: u32,
    },
    CoachUpdated {
        id: Ulid,
        price_per_session: Money,
        session_minutes: u32,
    },
    CoachRemoved {
        id: Ulid,
    },
    DateOpened {
        coach_id: Ulid,
        date: NaiveDate,
    },
    DateClosed {
        coach_id: Ulid,
        date: NaiveDate,
    },
    BookingCreated {
        id: Ulid,
        coach_id: Ulid,
        client_id: Ulid,
        sessions: Vec<Session>,
        total_price: Money,
        payment_method: PaymentMethod,
        status: BookingStatus,
        created_at: Ms,
        approved_by: Option<Actor>,
        started_at: Option<Ms>,
        completed_at: Option<Ms>,
    },
    BookingTransitioned {
        id: Ulid,
        coach_id: Ulid,
        client_id: Ulid,
        to: BookingStatus,
        actor: Actor,
        at: Ms,
    },
}

impl Event {
    /// Coach whose feed the event belongs to.
    pub fn coach_id(&self) -> Ulid {
        match self {
            Event::CoachRegistered { id, .. }
            | Event::CoachUpdated { id, .. }
            | Event::CoachRemoved { id } => *id,
            Event::DateOpened { coach_id, .. }
            | Event::DateClosed { coach_id, .. }
            | Event::BookingCreated { coach_id, .. }
            | Event::BookingTransitioned { coach_id, .. } => *coach_id,
        }
    }

    /// Client feed routing — booking events only.
    pub fn client_id(&self) -> Option<Ulid> {
        match self {
            Event::BookingCreated { client_id, .. }
            | Event::BookingTransitioned { client_id, .. } => Some(*client_id),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachInfo {
    pub id: Ulid,
    pub category: CoachCategory,
    pub price_per_session: Money,
    pub session_minutes: u32,
}

/// One row of the per-day slot board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub label: &'static str,
    pub start_minute: u16,
    pub end_minute: u16,
    pub taken: bool,
}

/// Earliest upcoming session among a client's active bookings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingSession {
    pub booking_id: Ulid,
    pub coach_id: Ulid,
    pub date: NaiveDate,
    pub slot_label: String,
    pub duration_minutes: u32,
}
