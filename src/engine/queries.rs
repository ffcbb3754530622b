use chrono::NaiveDate;
use ulid::Ulid;

use crate::catalog;
use crate::model::*;

use super::availability::open_days_in_month;
use super::conflict::today_utc;
use super::{Engine, EngineError};

impl Engine {
    /// Bookable days of `year`/`month` for one coach, ascending, with
    /// days before today already trimmed.
    pub async fn open_days(
        &self,
        coach_id: Ulid,
        year: i32,
        month: u32,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let cs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let guard = cs.read().await;
        open_days_in_month(guard.category, &guard.open_dates, year, month, today_utc())
    }

    /// The slot board for one coach and day: every catalog window in
    /// order, flagged taken where an active booking holds it.
    pub async fn day_slots(
        &self,
        coach_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let cs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let guard = cs.read().await;
        Ok(catalog::SLOTS
            .iter()
            .map(|slot| SlotInfo {
                label: slot.label,
                start_minute: slot.start_minute,
                end_minute: slot.end_minute,
                taken: guard.slot_holder(date, slot.label).is_some(),
            })
            .collect())
    }

    pub fn list_coaches(&self) -> Vec<CoachInfo> {
        self.state
            .iter()
            .map(|entry| {
                let cs = entry.value().clone();
                let guard = cs.try_read().expect("list_coaches: uncontended read");
                CoachInfo {
                    id: guard.id,
                    category: guard.category,
                    price_per_session: guard.price_per_session,
                    session_minutes: guard.session_minutes,
                }
            })
            .collect()
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let coach_id = match self.booking_to_coach.get(&id) {
            Some(entry) => *entry.value(),
            None => return Err(EngineError::NotFound(id)),
        };
        let cs = self.get_coach(&coach_id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn bookings_for_coach(&self, coach_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let cs = match self.get_coach(&coach_id) {
            Some(cs) => cs,
            None => return Ok(vec![]),
        };
        let guard = cs.read().await;
        Ok(guard.bookings.clone())
    }

    /// A client's bookings, newest first. `active_only` keeps only
    /// non-terminal statuses.
    pub async fn bookings_for_client(&self, client_id: Ulid, active_only: bool) -> Vec<Booking> {
        let ids: Vec<Ulid> = match self.client_bookings.get(&client_id) {
            Some(entry) => entry.value().clone(),
            None => return Vec::new(),
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let coach_id = match self.booking_to_coach.get(&id) {
                Some(entry) => *entry.value(),
                None => continue,
            };
            let cs = match self.get_coach(&coach_id) {
                Some(cs) => cs,
                None => continue,
            };
            let guard = cs.read().await;
            if let Some(b) = guard.booking(id)
                && (!active_only || b.is_active())
            {
                out.push(b.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Earliest upcoming session among the client's active bookings,
    /// today included. Ties on date break by catalog slot order.
    pub async fn next_session(&self, client_id: Ulid) -> Option<UpcomingSession> {
        let today = today_utc();
        let mut best: Option<(NaiveDate, usize, UpcomingSession)> = None;
        for b in self.bookings_for_client(client_id, true).await {
            for s in &b.sessions {
                if s.date < today {
                    continue;
                }
                let pos = catalog::position(&s.slot_label).unwrap_or(usize::MAX);
                if best
                    .as_ref()
                    .is_none_or(|(d, p, _)| (s.date, pos) < (*d, *p))
                {
                    best = Some((
                        s.date,
                        pos,
                        UpcomingSession {
                            booking_id: b.id,
                            coach_id: b.coach_id,
                            date: s.date,
                            slot_label: s.slot_label.clone(),
                            duration_minutes: s.duration_minutes,
                        },
                    ));
                }
            }
        }
        best.map(|(_, _, u)| u)
    }
}
