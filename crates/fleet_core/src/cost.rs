//! Pure cost-accrual math: hour-bucket enumeration and budget-ratio
//! classification. The actual ledger (storage, idempotent append) lives in
//! `fleet_infra::cost_tracker`; this module only computes *which* buckets
//! need a record and *what* alert a spend ratio implies.

const SECONDS_PER_HOUR: i64 = 3_600;

/// Truncate a Unix-epoch-seconds timestamp down to the start of its hour.
pub fn truncate_to_hour(epoch_s: i64) -> i64 {
    epoch_s.div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// Every hour-bucket a session should have a cost record for, given its
/// creation and (possibly still in-progress) end time. Inclusive of both
/// endpoints' buckets, so a session that lives a few seconds within a
/// single hour still yields exactly one bucket.
pub fn hour_buckets(created_at_epoch_s: i64, through_epoch_s: i64) -> Vec<i64> {
    let start = truncate_to_hour(created_at_epoch_s);
    let end = truncate_to_hour(through_epoch_s);
    if end < start {
        return Vec::new();
    }
    let mut buckets = Vec::with_capacity(((end - start) / SECONDS_PER_HOUR) as usize + 1);
    let mut current = start;
    while current <= end {
        buckets.push(current);
        current += SECONDS_PER_HOUR;
    }
    buckets
}

/// Budget alert levels. `Exceeded` consumes the consumer's one-shot
/// `alert_sent` flag; `Warning` deliberately does not, so it can re-fire
/// every tick while spend sits in the warning band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetAlert {
    Warning,
    Exceeded,
}

const WARNING_RATIO: f64 = 0.80;
const EXCEEDED_RATIO: f64 = 1.0;

/// Classify a consumer's month-to-date spend against their limit. Returns
/// `None` for unlimited consumers (limit <= 0) or when spend is below the
/// warning band. `already_alerted` suppresses a repeat `Exceeded` only —
/// callers must pass the consumer's `alert_sent` flag, not a derived value.
pub fn classify_budget(spend: f64, limit: f64, already_alerted: bool) -> Option<BudgetAlert> {
    if limit <= 0.0 {
        return None;
    }
    let ratio = spend / limit;
    if ratio >= EXCEEDED_RATIO {
        if already_alerted {
            return None;
        }
        return Some(BudgetAlert::Exceeded);
    }
    if ratio >= WARNING_RATIO {
        return Some(BudgetAlert::Warning);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hour_session_yields_one_bucket() {
        let created = 1_000; // within hour 0
        let stopped = 1_500; // same hour
        assert_eq!(hour_buckets(created, stopped), vec![0]);
    }

    #[test]
    fn multi_hour_session_yields_contiguous_buckets() {
        let created = 0;
        let stopped = 2 * SECONDS_PER_HOUR + 10;
        assert_eq!(
            hour_buckets(created, stopped),
            vec![0, SECONDS_PER_HOUR, 2 * SECONDS_PER_HOUR]
        );
    }

    #[test]
    fn budget_warning_does_not_set_while_exceeded_does() {
        assert_eq!(classify_budget(80.10, 100.0, false), Some(BudgetAlert::Warning));
        assert_eq!(classify_budget(100.20, 100.0, false), Some(BudgetAlert::Exceeded));
        assert_eq!(classify_budget(100.20, 100.0, true), None);
        // A repeat warning at the same ratio still fires — it never consumed the flag.
        assert_eq!(classify_budget(80.10, 100.0, true), Some(BudgetAlert::Warning));
    }

    #[test]
    fn unlimited_budget_never_alerts() {
        assert_eq!(classify_budget(1_000_000.0, 0.0, false), None);
    }
}
