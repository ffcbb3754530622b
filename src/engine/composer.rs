use chrono::NaiveDate;
use ulid::Ulid;

use crate::catalog;
use crate::model::*;

use super::availability::is_day_open;
use super::conflict::today_utc;
use super::{Engine, EngineError, pricing};

/// Drives the selection flow for one booking: coach, then day, then a
/// single slot, then payment. Each step invalidates the steps after it,
/// so a stale slot can never survive a change of day or month.
///
/// The checks here are advisory; `submit` re-runs all of them inside
/// the engine under the coach's write lock.
#[derive(Debug, Default)]
pub struct BookingComposer {
    client_id: Option<Ulid>,
    coach_id: Option<Ulid>,
    day: Option<NaiveDate>,
    slot_label: Option<String>,
    payment_method: Option<PaymentMethod>,
}

impl BookingComposer {
    pub fn new(client_id: Option<Ulid>) -> Self {
        BookingComposer {
            client_id,
            ..Default::default()
        }
    }

    pub fn coach_id(&self) -> Option<Ulid> {
        self.coach_id
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }

    pub fn slot_label(&self) -> Option<&str> {
        self.slot_label.as_deref()
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method
    }

    /// Selecting a coach restarts everything below it.
    pub fn select_coach(&mut self, coach_id: Ulid) {
        self.coach_id = Some(coach_id);
        self.day = None;
        self.slot_label = None;
        self.payment_method = None;
    }

    /// Month navigation drops any chosen day and slot. Returns the open
    /// days of the shown month, ascending.
    pub async fn view_month(
        &mut self,
        engine: &Engine,
        year: i32,
        month: u32,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let coach_id = self.coach_id.ok_or(EngineError::NoCoachSelected)?;
        self.day = None;
        self.slot_label = None;
        engine.open_days(coach_id, year, month).await
    }

    /// Choosing a day clears any previously chosen slot. Returns the
    /// day's slot board.
    pub async fn select_day(
        &mut self,
        engine: &Engine,
        date: NaiveDate,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let coach_id = self.coach_id.ok_or(EngineError::NoCoachSelected)?;
        self.slot_label = None;

        let cs = engine
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        {
            let guard = cs.read().await;
            let today = today_utc();
            if date < today {
                return Err(EngineError::DayInPast(date));
            }
            if !is_day_open(guard.category, &guard.open_dates, date, today) {
                return Err(EngineError::DayNotOpen { coach_id, date });
            }
        }
        self.day = Some(date);
        engine.day_slots(coach_id, date).await
    }

    /// A slot may be picked only after a day. A taken slot is refused
    /// here and again at submit.
    pub async fn select_slot(
        &mut self,
        engine: &Engine,
        slot_label: &str,
    ) -> Result<(), EngineError> {
        let coach_id = self.coach_id.ok_or(EngineError::NoCoachSelected)?;
        let date = self.day.ok_or(EngineError::NoDaySelected)?;
        if catalog::by_label(slot_label).is_none() {
            return Err(EngineError::UnknownSlot(slot_label.to_string()));
        }

        let cs = engine
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let guard = cs.read().await;
        if let Some(holder) = guard.slot_holder(date, slot_label) {
            return Err(EngineError::SlotTaken {
                date,
                slot_label: slot_label.to_string(),
                holder,
            });
        }
        drop(guard);

        self.slot_label = Some(slot_label.to_string());
        Ok(())
    }

    pub fn select_payment(&mut self, method: PaymentMethod) {
        self.payment_method = Some(method);
    }

    /// The price the caller will pay, surfaced before submit.
    pub async fn quote(&self, engine: &Engine) -> Result<Money, EngineError> {
        let coach_id = self.coach_id.ok_or(EngineError::NoCoachSelected)?;
        if self.slot_label.is_none() {
            return Err(EngineError::NoSlotSelected);
        }
        let cs = engine
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let guard = cs.read().await;
        Ok(pricing::total_price(1, guard.price_per_session))
    }

    /// Commit the flow. The engine re-validates the whole selection
    /// under the coach's write lock, so a slot taken since selection
    /// surfaces as a conflict instead of a double booking. Selection
    /// state is cleared only on success; on failure the caller may fix
    /// the selection and retry.
    pub async fn submit(&mut self, engine: &Engine) -> Result<Booking, EngineError> {
        let client_id = self.client_id.ok_or(EngineError::MissingClient)?;
        let coach_id = self.coach_id.ok_or(EngineError::NoCoachSelected)?;
        let date = self.day.ok_or(EngineError::NoDaySelected)?;
        let slot_label = self
            .slot_label
            .clone()
            .ok_or(EngineError::NoSlotSelected)?;
        let payment_method = self.payment_method.ok_or(EngineError::NoPaymentMethod)?;

        let booking = engine
            .create_booking(
                Ulid::new(),
                coach_id,
                client_id,
                vec![SessionRequest { date, slot_label }],
                payment_method,
            )
            .await?;

        self.day = None;
        self.slot_label = None;
        self.payment_method = None;
        Ok(booking)
    }
}
