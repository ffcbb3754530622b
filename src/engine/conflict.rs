use chrono::NaiveDate;

use crate::catalog;
use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::availability;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Calendar "today" in UTC; the boundary for past-date rejection.
pub(crate) fn today_utc() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Reject `(date, slot)` if an active booking already holds it. Terminal
/// bookings never block.
pub(crate) fn check_slot_free(
    cs: &CoachState,
    date: NaiveDate,
    slot_label: &str,
) -> Result<(), EngineError> {
    if let Some(holder) = cs.slot_holder(date, slot_label) {
        return Err(EngineError::SlotTaken {
            date,
            slot_label: slot_label.to_string(),
            holder,
        });
    }
    Ok(())
}

/// Full pre-commit validation of a session request list against a coach.
/// Shape first (emptiness, limits, catalog, calendar), conflicts last, so
/// the caller gets the most actionable error. Runs again under the coach
/// write lock at commit time; that second pass is the authoritative one.
pub(crate) fn validate_requests(
    cs: &CoachState,
    requests: &[SessionRequest],
    today: NaiveDate,
) -> Result<(), EngineError> {
    if requests.is_empty() {
        return Err(EngineError::NoSessions);
    }
    if requests.len() > MAX_SESSIONS_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many sessions in one booking"));
    }
    for (i, req) in requests.iter().enumerate() {
        if catalog::by_label(&req.slot_label).is_none() {
            return Err(EngineError::UnknownSlot(req.slot_label.clone()));
        }
        if req.date < today {
            return Err(EngineError::DayInPast(req.date));
        }
        if !availability::is_day_open(cs.category, &cs.open_dates, req.date, today) {
            return Err(EngineError::DayNotOpen {
                coach_id: cs.id,
                date: req.date,
            });
        }
        // A duplicate inside one request is a conflict with ourselves.
        for earlier in &requests[..i] {
            if earlier.date == req.date && earlier.slot_label == req.slot_label {
                return Err(EngineError::DuplicateSession {
                    date: req.date,
                    slot_label: req.slot_label.clone(),
                });
            }
        }
        check_slot_free(cs, req.date, &req.slot_label)?;
    }
    Ok(())
}
