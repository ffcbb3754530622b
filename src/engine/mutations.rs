use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, today_utc, validate_requests};
use super::{Engine, EngineError, SharedCoachState, WalCommand, lifecycle, pricing};

impl Engine {
    pub async fn register_coach(
        &self,
        id: Ulid,
        category: CoachCategory,
        price_per_session: Option<Money>,
        session_minutes: Option<u32>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_COACHES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many coaches"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let price = price_per_session.unwrap_or_else(|| pricing::default_price(category));
        let minutes = session_minutes.unwrap_or_else(|| pricing::default_session_minutes(category));
        if price <= 0 {
            return Err(EngineError::LimitExceeded("price must be positive"));
        }
        if minutes == 0 {
            return Err(EngineError::LimitExceeded("session minutes must be positive"));
        }

        let event = Event::CoachRegistered {
            id,
            category,
            price_per_session: price,
            session_minutes: minutes,
        };
        self.wal_append(&event).await?;
        let cs = CoachState::new(id, category, price, minutes);
        self.state.insert(id, Arc::new(RwLock::new(cs)));
        self.notify.publish(&event);
        Ok(())
    }

    /// Update profile fields. `None` keeps the current value. Existing
    /// bookings keep the price and duration they were created with.
    pub async fn update_coach(
        &self,
        id: Ulid,
        price_per_session: Option<Money>,
        session_minutes: Option<u32>,
    ) -> Result<(), EngineError> {
        let cs = self.get_coach(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = cs.write().await;
        let price = price_per_session.unwrap_or(guard.price_per_session);
        let minutes = session_minutes.unwrap_or(guard.session_minutes);
        if price <= 0 {
            return Err(EngineError::LimitExceeded("price must be positive"));
        }
        if minutes == 0 {
            return Err(EngineError::LimitExceeded("session minutes must be positive"));
        }

        let event = Event::CoachUpdated {
            id,
            price_per_session: price,
            session_minutes: minutes,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Refused while any booking is still active; terminal history goes
    /// with the coach.
    pub async fn remove_coach(&self, id: Ulid) -> Result<(), EngineError> {
        let cs = self.get_coach(&id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.write().await;
        if guard.has_active_bookings() {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::CoachRemoved { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_to_coach.remove(&b.id);
            if let Some(mut ids) = self.client_bookings.get_mut(&b.client_id) {
                ids.retain(|x| *x != b.id);
            }
        }
        self.state.remove(&id);
        self.notify.publish(&event);
        Ok(())
    }

    /// Open a calendar date for a self-scheduled coach. Idempotent.
    pub async fn open_date(&self, coach_id: Ulid, date: NaiveDate) -> Result<(), EngineError> {
        let cs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = cs.write().await;
        if guard.category != CoachCategory::SelfScheduled {
            return Err(EngineError::NotSelfScheduled(coach_id));
        }
        if date < today_utc() {
            return Err(EngineError::DayInPast(date));
        }
        if guard.open_dates.contains(&date) {
            return Ok(());
        }
        if guard.open_dates.len() >= MAX_OPEN_DATES_PER_COACH {
            return Err(EngineError::LimitExceeded("too many open dates"));
        }

        let event = Event::DateOpened { coach_id, date };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Withdraw a date from the calendar. Idempotent; existing bookings on
    /// the date stand — openness is checked at creation time only.
    pub async fn close_date(&self, coach_id: Ulid, date: NaiveDate) -> Result<(), EngineError> {
        let cs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = cs.write().await;
        if guard.category != CoachCategory::SelfScheduled {
            return Err(EngineError::NotSelfScheduled(coach_id));
        }
        if !guard.open_dates.contains(&date) {
            return Ok(());
        }

        let event = Event::DateClosed { coach_id, date };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// The atomic conditional write. Validation and the insert both happen
    /// under the coach's write lock, so a concurrent submit for the same
    /// slot serializes behind this one and fails its own re-check.
    pub async fn create_booking(
        &self,
        id: Ulid,
        coach_id: Ulid,
        client_id: Ulid,
        requests: Vec<SessionRequest>,
        payment_method: PaymentMethod,
    ) -> Result<Booking, EngineError> {
        if self.booking_to_coach.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let cs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let mut guard = cs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_COACH {
            return Err(EngineError::LimitExceeded("too many bookings on coach"));
        }

        if let Err(e) = validate_requests(&guard, &requests, today_utc()) {
            if matches!(e, EngineError::SlotTaken { .. }) {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        let sessions: Vec<Session> = requests
            .into_iter()
            .map(|r| Session {
                date: r.date,
                slot_label: r.slot_label,
                duration_minutes: guard.session_minutes,
            })
            .collect();
        let booking = Booking {
            id,
            coach_id,
            client_id,
            total_price: pricing::total_price(sessions.len(), guard.price_per_session),
            sessions,
            payment_method,
            status: lifecycle::initial_status(payment_method),
            created_at: now_ms(),
            approved_by: None,
            started_at: None,
            completed_at: None,
        };

        let event = Event::BookingCreated {
            id: booking.id,
            coach_id: booking.coach_id,
            client_id: booking.client_id,
            sessions: booking.sessions.clone(),
            total_price: booking.total_price,
            payment_method: booking.payment_method,
            status: booking.status,
            created_at: booking.created_at,
            approved_by: None,
            started_at: None,
            completed_at: None,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Role-gated lifecycle transition. The decision is made against the
    /// stored status under the coach write lock, then persisted; a
    /// rejected transition leaves the stored status untouched.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        to: BookingStatus,
        actor: Actor,
    ) -> Result<Booking, EngineError> {
        let (coach_id, mut guard) = self.resolve_booking_write(&id).await?;
        let b = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        lifecycle::check(b.status, to, actor)?;
        let client_id = b.client_id;

        let event = Event::BookingTransitioned {
            id,
            coach_id,
            client_id,
            to,
            actor,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL).increment(1);
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Booking ids stuck in pending_payment longer than `window_ms`.
    /// try_read only — the reaper must never contend with live writers.
    pub fn collect_expired_payments(&self, now: Ms, window_ms: Ms) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let cs = entry.value().clone();
            if let Ok(guard) = cs.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::PendingPayment
                        && b.created_at + window_ms <= now
                    {
                        expired.push(b.id);
                    }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. BookingCreated carries current status
    /// and stamps, so the compacted log needs no transition history.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let coaches: Vec<SharedCoachState> =
            self.state.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for cs in coaches {
            let guard = cs.read().await;
            events.push(Event::CoachRegistered {
                id: guard.id,
                category: guard.category,
                price_per_session: guard.price_per_session,
                session_minutes: guard.session_minutes,
            });
            for date in &guard.open_dates {
                events.push(Event::DateOpened {
                    coach_id: guard.id,
                    date: *date,
                });
            }
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    coach_id: b.coach_id,
                    client_id: b.client_id,
                    sessions: b.sessions.clone(),
                    total_price: b.total_price,
                    payment_method: b.payment_method,
                    status: b.status,
                    created_at: b.created_at,
                    approved_by: b.approved_by,
                    started_at: b.started_at,
                    completed_at: b.completed_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
