//! Availability-confidence degradation math.
//!
//! Pure functions only — the event storage (which offer failed when) lives
//! in `fleet_infra::inventory::failures`; this module just turns counts and
//! ages into multipliers so the policy is unit-testable without a clock.

/// Confidence decays linearly with cache age: full confidence below 2
/// minutes, 0.5 at 5 minutes, flat at 0.5 beyond.
const FRESH_WINDOW_S: f64 = 120.0;
const STALE_WINDOW_S: f64 = 300.0;
const FLOOR_FACTOR: f64 = 0.5;

/// Per-failure decay applied to an offer with `k` failures in the last 30
/// minutes.
const PER_FAILURE_DECAY: f64 = 0.7;

/// An offer is suppressed outright once it accrues this many failures
/// within the suppression lookback window.
pub const SUPPRESSION_FAILURE_THRESHOLD: u32 = 3;
pub const SUPPRESSION_LOOKBACK_S: i64 = 30 * 60;
pub const SUPPRESSION_DURATION_S: i64 = 30 * 60;

/// Additional multiplier applied to every offer of a (provider, gpu model)
/// pair once that pair has accrued enough distinct failing offers.
pub const PAIR_DEGRADATION_DISTINCT_THRESHOLD: u32 = 3;
pub const PAIR_DEGRADATION_LOOKBACK_S: i64 = 60 * 60;
const PAIR_DEGRADATION_FACTOR: f64 = 0.3;

/// Floor applied to the final multiplier for offers that are degraded but
/// not suppressed outright.
const FINAL_MULTIPLIER_FLOOR: f64 = 0.05;

/// Staleness-only confidence factor for a cache entry of the given age.
pub fn staleness_factor(age_s: f64) -> f64 {
    if age_s < FRESH_WINDOW_S {
        return 1.0;
    }
    if age_s >= STALE_WINDOW_S {
        return FLOOR_FACTOR;
    }
    let span = STALE_WINDOW_S - FRESH_WINDOW_S;
    let progress = (age_s - FRESH_WINDOW_S) / span;
    1.0 - progress * (1.0 - FLOOR_FACTOR)
}

/// Per-offer failure multiplier from `recent_failures` counted within
/// [`SUPPRESSION_LOOKBACK_S`] of now.
pub fn failure_multiplier(recent_failures: u32) -> f64 {
    PER_FAILURE_DECAY.powi(recent_failures as i32)
}

/// Whether an offer with `recent_failures` in the lookback window is
/// suppressed outright (filtered from every listing).
pub fn is_suppressed(recent_failures: u32) -> bool {
    recent_failures >= SUPPRESSION_FAILURE_THRESHOLD
}

/// Combine staleness, per-offer failure decay, and pair-level degradation
/// into the multiplier actually applied to an offer's availability
/// confidence. Returns `None` if the offer is suppressed outright (the
/// caller must filter it from results, not merely degrade it).
pub fn effective_multiplier(
    age_s: f64,
    recent_failures: u32,
    pair_distinct_recent_failures: u32,
) -> Option<f64> {
    if is_suppressed(recent_failures) {
        return None;
    }

    let mut multiplier = staleness_factor(age_s) * failure_multiplier(recent_failures);
    if pair_distinct_recent_failures >= PAIR_DEGRADATION_DISTINCT_THRESHOLD {
        multiplier *= PAIR_DEGRADATION_FACTOR;
    }
    Some(multiplier.max(FINAL_MULTIPLIER_FLOOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_is_full_confidence() {
        assert_eq!(staleness_factor(0.0), 1.0);
        assert_eq!(staleness_factor(FRESH_WINDOW_S - 0.001), 1.0);
    }

    #[test]
    fn stale_cache_floors_at_half() {
        assert_eq!(staleness_factor(STALE_WINDOW_S + 0.001), 0.5);
        assert_eq!(staleness_factor(10_000.0), 0.5);
    }

    #[test]
    fn staleness_decays_linearly_between_windows() {
        let midpoint = (FRESH_WINDOW_S + STALE_WINDOW_S) / 2.0;
        let factor = staleness_factor(midpoint);
        assert!((factor - 0.75).abs() < 1e-9);
    }

    #[test]
    fn three_failures_in_window_suppress_the_offer() {
        assert!(!is_suppressed(2));
        assert!(is_suppressed(3));
        assert!(effective_multiplier(0.0, 3, 0).is_none());
    }

    #[test]
    fn pair_degradation_multiplies_non_suppressed_offers() {
        let without_pair_effect = effective_multiplier(0.0, 1, 0).unwrap();
        let with_pair_effect = effective_multiplier(0.0, 1, 3).unwrap();
        assert!(with_pair_effect < without_pair_effect);
    }

    #[test]
    fn multiplier_never_drops_below_floor() {
        let m = effective_multiplier(10_000.0, 2, 5).unwrap();
        assert!(m >= FINAL_MULTIPLIER_FLOOR);
    }
}
