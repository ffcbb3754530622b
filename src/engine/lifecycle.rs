//! The booking state machine. Every status write in the crate goes
//! through `check` + `apply`; there is no other path to `Booking::status`.

use crate::model::{Actor, Booking, BookingStatus, Ms, PaymentMethod};

use super::EngineError;

pub const ALL_STATUSES: [BookingStatus; 6] = [
    BookingStatus::PendingConfirmation,
    BookingStatus::PendingPayment,
    BookingStatus::Confirmed,
    BookingStatus::InProgress,
    BookingStatus::Completed,
    BookingStatus::Cancelled,
];

/// Cash is settled in person, so the coach confirms; online bookings wait
/// for payment capture first.
pub fn initial_status(method: PaymentMethod) -> BookingStatus {
    match method {
        PaymentMethod::Cash => BookingStatus::PendingConfirmation,
        PaymentMethod::Online => BookingStatus::PendingPayment,
    }
}

/// Roles permitted to move `from -> to`. Empty slice means the edge does
/// not exist.
pub fn actors_for(from: BookingStatus, to: BookingStatus) -> &'static [Actor] {
    use BookingStatus::*;
    match (from, to) {
        (PendingConfirmation, Confirmed) => &[Actor::Coach],
        (PendingConfirmation, Cancelled) => &[Actor::Coach, Actor::Client],
        // Capture is reported by the payment collaborator, expiry by the reaper.
        (PendingPayment, Confirmed) => &[Actor::Operator, Actor::System],
        (PendingPayment, Cancelled) => &[Actor::Client, Actor::System],
        (Confirmed, InProgress) => &[Actor::Coach],
        (Confirmed, Cancelled) => &[Actor::Coach, Actor::Client],
        (InProgress, Completed) => &[Actor::Coach],
        (InProgress, Cancelled) => &[Actor::Coach, Actor::Operator],
        _ => &[],
    }
}

/// Validate a transition without touching any state.
pub fn check(from: BookingStatus, to: BookingStatus, actor: Actor) -> Result<(), EngineError> {
    let actors = actors_for(from, to);
    if actors.is_empty() {
        return Err(EngineError::IllegalTransition { from, to });
    }
    if !actors.contains(&actor) {
        return Err(EngineError::ActorNotAllowed { from, to, actor });
    }
    Ok(())
}

/// Unconditional application with side-effect stamps. Callers must have
/// passed `check`, or be replaying a previously accepted event.
pub fn apply(b: &mut Booking, to: BookingStatus, actor: Actor, at: Ms) {
    match to {
        BookingStatus::Confirmed => b.approved_by = Some(actor),
        BookingStatus::InProgress => b.started_at = Some(at),
        BookingStatus::Completed => b.completed_at = Some(at),
        _ => {}
    }
    b.status = to;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn legal_edges() -> Vec<(BookingStatus, BookingStatus)> {
        use BookingStatus::*;
        vec![
            (PendingConfirmation, Confirmed),
            (PendingConfirmation, Cancelled),
            (PendingPayment, Confirmed),
            (PendingPayment, Cancelled),
            (Confirmed, InProgress),
            (Confirmed, Cancelled),
            (InProgress, Completed),
            (InProgress, Cancelled),
        ]
    }

    fn test_booking(status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            coach_id: Ulid::new(),
            client_id: Ulid::new(),
            sessions: vec![Session {
                date: NaiveDate::from_ymd_opt(2030, 6, 10).unwrap(),
                slot_label: "9:00 AM - 11:00 AM".into(),
                duration_minutes: 120,
            }],
            total_price: 350,
            payment_method: PaymentMethod::Cash,
            status,
            created_at: 1000,
            approved_by: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn initial_status_by_payment() {
        assert_eq!(
            initial_status(PaymentMethod::Cash),
            BookingStatus::PendingConfirmation
        );
        assert_eq!(
            initial_status(PaymentMethod::Online),
            BookingStatus::PendingPayment
        );
    }

    #[test]
    fn transition_closure_over_all_pairs() {
        // Every (from, to) pair either appears in the table or is rejected
        // for every actor. No edge outside the table is reachable.
        let legal = legal_edges();
        for from in ALL_STATUSES {
            for to in ALL_STATUSES {
                let is_legal = legal.contains(&(from, to));
                let actors = actors_for(from, to);
                assert_eq!(!actors.is_empty(), is_legal, "edge {from:?} -> {to:?}");
                if !is_legal {
                    for actor in [Actor::Client, Actor::Coach, Actor::Operator, Actor::System] {
                        assert!(matches!(
                            check(from, to, actor),
                            Err(EngineError::IllegalTransition { .. })
                        ));
                    }
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [BookingStatus::Completed, BookingStatus::Cancelled] {
            for to in ALL_STATUSES {
                assert!(actors_for(from, to).is_empty());
            }
        }
    }

    #[test]
    fn actor_gating() {
        use BookingStatus::*;
        // The client cannot approve their own booking.
        assert!(matches!(
            check(PendingConfirmation, Confirmed, Actor::Client),
            Err(EngineError::ActorNotAllowed { .. })
        ));
        // The coach does not capture payments.
        assert!(matches!(
            check(PendingPayment, Confirmed, Actor::Coach),
            Err(EngineError::ActorNotAllowed { .. })
        ));
        // Only the coach starts a session.
        assert!(matches!(
            check(Confirmed, InProgress, Actor::Operator),
            Err(EngineError::ActorNotAllowed { .. })
        ));
        assert!(check(Confirmed, InProgress, Actor::Coach).is_ok());
        // Either party may cancel before start.
        assert!(check(Confirmed, Cancelled, Actor::Client).is_ok());
        assert!(check(Confirmed, Cancelled, Actor::Coach).is_ok());
        // The reaper cancels expired payments.
        assert!(check(PendingPayment, Cancelled, Actor::System).is_ok());
    }

    #[test]
    fn confirm_stamps_approved_by() {
        let mut b = test_booking(BookingStatus::PendingConfirmation);
        apply(&mut b, BookingStatus::Confirmed, Actor::Coach, 5000);
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.approved_by, Some(Actor::Coach));
        assert_eq!(b.started_at, None);
        assert_eq!(b.completed_at, None);
    }

    #[test]
    fn start_and_complete_stamp_timestamps() {
        let mut b = test_booking(BookingStatus::Confirmed);
        apply(&mut b, BookingStatus::InProgress, Actor::Coach, 6000);
        assert_eq!(b.started_at, Some(6000));
        apply(&mut b, BookingStatus::Completed, Actor::Coach, 7000);
        assert_eq!(b.completed_at, Some(7000));
        assert_eq!(b.status, BookingStatus::Completed);
    }

    #[test]
    fn cancel_stamps_nothing() {
        let mut b = test_booking(BookingStatus::PendingConfirmation);
        apply(&mut b, BookingStatus::Cancelled, Actor::Client, 5000);
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.approved_by, None);
        assert_eq!(b.started_at, None);
        assert_eq!(b.completed_at, None);
    }

    #[test]
    fn walk_forward_only() {
        // A full happy-path walk touches each stamp exactly once.
        let mut b = test_booking(BookingStatus::PendingPayment);
        check(b.status, BookingStatus::Confirmed, Actor::Operator).unwrap();
        apply(&mut b, BookingStatus::Confirmed, Actor::Operator, 1);
        check(b.status, BookingStatus::InProgress, Actor::Coach).unwrap();
        apply(&mut b, BookingStatus::InProgress, Actor::Coach, 2);
        check(b.status, BookingStatus::Completed, Actor::Coach).unwrap();
        apply(&mut b, BookingStatus::Completed, Actor::Coach, 3);
        assert_eq!(b.approved_by, Some(Actor::Operator));
        assert_eq!(b.started_at, Some(2));
        assert_eq!(b.completed_at, Some(3));
        // And the walk is over.
        assert!(check(b.status, BookingStatus::InProgress, Actor::Coach).is_err());
    }
}
