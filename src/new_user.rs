//! First-use EUR allowance for users buying crypto with fiat.

use crate::classifier::TimedSwap;
use crate::core::config::LimitsPolicy;
use chrono::{DateTime, Utc};

/// Remaining first-use EUR allowance, in whole euros.
///
/// Returns `f64::INFINITY` once the user's first EUR swap is older than the
/// new-user window; the allowance then no longer constrains anything.
pub fn remaining_eur_allowance(
    swaps: &[TimedSwap],
    policy: &LimitsPolicy,
    now: DateTime<Utc>,
) -> f64 {
    let mut swaps: Vec<&TimedSwap> = swaps.iter().collect();
    // Pending swaps sort last
    swaps.sort_by_key(|s| (s.timestamp.is_none(), s.timestamp));

    let window_start = now - policy.new_user_window();
    if swaps
        .first()
        .and_then(|s| s.timestamp)
        .is_some_and(|ts| ts < window_start)
    {
        return f64::INFINITY;
    }

    let spent: f64 = swaps.iter().map(|s| s.amount as f64 / 100.0).sum();
    (policy.new_user_eur_ceiling - spent).max(0.0)
}
