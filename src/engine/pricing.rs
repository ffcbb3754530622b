//! Category pricing. Totals are always derived server-side at commit;
//! a client-supplied total is never trusted.

use crate::model::{CoachCategory, Money};

/// Default per-session price for a category, applied when a coach is
/// registered without an explicit price.
pub fn default_price(category: CoachCategory) -> Money {
    match category {
        CoachCategory::General => 350,
        CoachCategory::SelfScheduled => 500,
    }
}

/// Default session length; both tiers book whole catalog windows.
pub fn default_session_minutes(_category: CoachCategory) -> u32 {
    120
}

/// `count(sessions) x price_per_session`.
pub fn total_price(session_count: usize, price_per_session: Money) -> Money {
    session_count as Money * price_per_session
}
