use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::{Actor, BookingStatus, Ms};

/// Background task that cancels bookings stuck in pending_payment past
/// the payment window.
pub async fn run_reaper(engine: Arc<Engine>, payment_window_ms: Ms) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_payments(now, payment_window_ms);
        for booking_id in expired {
            match engine
                .transition_booking(booking_id, BookingStatus::Cancelled, Actor::System)
                .await
            {
                Ok(_) => {
                    info!("expired unpaid booking {booking_id}");
                    metrics::counter!(crate::observability::PAYMENTS_EXPIRED_TOTAL).increment(1);
                }
                Err(e) => {
                    // Paid or cancelled since the scan, nothing to do
                    tracing::debug!("reaper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("sessiond_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn reaper_collects_expired_payments() {
        let path = test_wal_path("reaper_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let coach = Ulid::new();
        engine
            .register_coach(coach, CoachCategory::General, None, None)
            .await
            .unwrap();

        // One online booking (pending_payment) and one cash booking
        let unpaid = Ulid::new();
        engine
            .create_booking(
                unpaid,
                coach,
                Ulid::new(),
                vec![SessionRequest {
                    date: date(2030, 6, 10),
                    slot_label: "9:00 AM - 11:00 AM".into(),
                }],
                PaymentMethod::Online,
            )
            .await
            .unwrap();
        engine
            .create_booking(
                Ulid::new(),
                coach,
                Ulid::new(),
                vec![SessionRequest {
                    date: date(2030, 6, 10),
                    slot_label: "1:00 PM - 3:00 PM".into(),
                }],
                PaymentMethod::Cash,
            )
            .await
            .unwrap();

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;

        // Window still open: nothing to collect
        let expired = engine.collect_expired_payments(now, 3_600_000);
        assert!(expired.is_empty());

        // Window elapsed: only the unpaid online booking is collected
        let expired = engine.collect_expired_payments(now + 10_000, 5_000);
        assert_eq!(expired, vec![unpaid]);

        // Cancel it the way the reaper would
        engine
            .transition_booking(unpaid, BookingStatus::Cancelled, Actor::System)
            .await
            .unwrap();

        let expired_after = engine.collect_expired_payments(now + 10_000, 5_000);
        assert!(expired_after.is_empty());
    }
}
