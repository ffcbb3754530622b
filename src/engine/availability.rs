use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::engine::error::EngineError;
use crate::limits::*;
use crate::model::CoachCategory;

// ── Calendar resolution ──────────────────────────────────────────

/// Number of days in `year-month`. Malformed input is rejected, not clamped.
pub fn days_in_month(year: i32, month: u32) -> Result<u32, EngineError> {
    if !(MIN_CALENDAR_YEAR..=MAX_CALENDAR_YEAR).contains(&year) || !(1..=12).contains(&month) {
        return Err(EngineError::InvalidMonth { year, month });
    }
    let first = month_start(year, month)?;
    let next = if month == 12 {
        month_start(year + 1, 1)?
    } else {
        month_start(year, month + 1)?
    };
    Ok((next - first).num_days() as u32)
}

fn month_start(year: i32, month: u32) -> Result<NaiveDate, EngineError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(EngineError::InvalidMonth { year, month })
}

/// Whether `date` is selectable for a coach of `category`.
///
/// General: any non-past date. Self-scheduled: the date must be in the
/// coach's opened set, and non-past.
pub fn is_day_open(
    category: CoachCategory,
    open_dates: &BTreeSet<NaiveDate>,
    date: NaiveDate,
    today: NaiveDate,
) -> bool {
    if date < today {
        return false;
    }
    match category {
        CoachCategory::General => true,
        CoachCategory::SelfScheduled => open_dates.contains(&date),
    }
}

/// All selectable days of `year-month`, in calendar order.
pub fn open_days_in_month(
    category: CoachCategory,
    open_dates: &BTreeSet<NaiveDate>,
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Result<Vec<NaiveDate>, EngineError> {
    let days = days_in_month(year, month)?;
    let first = month_start(year, month)?;
    let last = NaiveDate::from_ymd_opt(year, month, days)
        .ok_or(EngineError::InvalidMonth { year, month })?;

    match category {
        // The opened set is sorted, so the month slice comes out in order.
        CoachCategory::SelfScheduled => Ok(open_dates
            .range(first..=last)
            .copied()
            .filter(|d| *d >= today)
            .collect()),
        CoachCategory::General => {
            let mut open = Vec::new();
            let mut date = first;
            while date <= last {
                if date >= today {
                    open.push(date);
                }
                date = date.succ_opt().ok_or(EngineError::InvalidMonth { year, month })?;
            }
            Ok(open)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar(dates: &[NaiveDate]) -> BTreeSet<NaiveDate> {
        dates.iter().copied().collect()
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2030, 1).unwrap(), 31);
        assert_eq!(days_in_month(2030, 4).unwrap(), 30);
        assert_eq!(days_in_month(2030, 2).unwrap(), 28);
        assert_eq!(days_in_month(2028, 2).unwrap(), 29); // leap
        assert_eq!(days_in_month(2030, 12).unwrap(), 31); // year rollover path
    }

    #[test]
    fn malformed_month_rejected() {
        assert!(matches!(
            days_in_month(2030, 0),
            Err(EngineError::InvalidMonth { .. })
        ));
        assert!(matches!(
            days_in_month(2030, 13),
            Err(EngineError::InvalidMonth { .. })
        ));
        assert!(days_in_month(MIN_CALENDAR_YEAR - 1, 6).is_err());
        assert!(days_in_month(MAX_CALENDAR_YEAR + 1, 6).is_err());
    }

    #[test]
    fn general_day_open_unless_past() {
        let today = date(2030, 6, 15);
        let none = BTreeSet::new();
        assert!(!is_day_open(CoachCategory::General, &none, date(2030, 6, 14), today));
        assert!(is_day_open(CoachCategory::General, &none, today, today));
        assert!(is_day_open(CoachCategory::General, &none, date(2030, 6, 16), today));
    }

    #[test]
    fn self_scheduled_requires_opened_date() {
        let today = date(2030, 6, 15);
        let cal = calendar(&[date(2030, 6, 20), date(2030, 6, 10)]);
        assert!(is_day_open(CoachCategory::SelfScheduled, &cal, date(2030, 6, 20), today));
        // Not opened.
        assert!(!is_day_open(CoachCategory::SelfScheduled, &cal, date(2030, 6, 21), today));
        // Opened but past.
        assert!(!is_day_open(CoachCategory::SelfScheduled, &cal, date(2030, 6, 10), today));
    }

    #[test]
    fn general_month_view_trims_past_days() {
        let today = date(2030, 6, 15);
        let none = BTreeSet::new();
        let open = open_days_in_month(CoachCategory::General, &none, 2030, 6, today).unwrap();
        assert_eq!(open.len(), 16); // 15th through 30th
        assert_eq!(open[0], today);
        assert_eq!(*open.last().unwrap(), date(2030, 6, 30));
    }

    #[test]
    fn general_month_fully_past_is_empty() {
        let today = date(2030, 7, 1);
        let none = BTreeSet::new();
        let open = open_days_in_month(CoachCategory::General, &none, 2030, 6, today).unwrap();
        assert!(open.is_empty());
    }

    #[test]
    fn general_future_month_fully_open() {
        let today = date(2030, 6, 15);
        let none = BTreeSet::new();
        let open = open_days_in_month(CoachCategory::General, &none, 2030, 7, today).unwrap();
        assert_eq!(open.len(), 31);
    }

    #[test]
    fn self_scheduled_month_view_is_calendar_slice() {
        let today = date(2030, 6, 1);
        let cal = calendar(&[
            date(2030, 5, 30), // previous month
            date(2030, 6, 10),
            date(2030, 6, 20),
            date(2030, 7, 2), // next month
        ]);
        let open =
            open_days_in_month(CoachCategory::SelfScheduled, &cal, 2030, 6, today).unwrap();
        assert_eq!(open, vec![date(2030, 6, 10), date(2030, 6, 20)]);
    }

    #[test]
    fn self_scheduled_month_view_drops_past_opened_days() {
        let today = date(2030, 6, 15);
        let cal = calendar(&[date(2030, 6, 10), date(2030, 6, 20)]);
        let open =
            open_days_in_month(CoachCategory::SelfScheduled, &cal, 2030, 6, today).unwrap();
        assert_eq!(open, vec![date(2030, 6, 20)]);
    }

    #[test]
    fn self_scheduled_empty_calendar_no_days() {
        let today = date(2030, 6, 1);
        let open = open_days_in_month(
            CoachCategory::SelfScheduled,
            &BTreeSet::new(),
            2030,
            6,
            today,
        )
        .unwrap();
        assert!(open.is_empty());
    }

    #[test]
    fn month_view_sorted() {
        let today = date(2030, 6, 1);
        let cal = calendar(&[date(2030, 6, 25), date(2030, 6, 3), date(2030, 6, 14)]);
        let open =
            open_days_in_month(CoachCategory::SelfScheduled, &cal, 2030, 6, today).unwrap();
        assert!(open.windows(2).all(|w| w[0] < w[1]));
    }
}
