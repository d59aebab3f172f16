//! Per-offer failure memory: the mutex-guarded container around
//! `fleet_core::offer::degradation`'s pure math.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use async_trait::async_trait;
use fleet_core::offer::{
    PAIR_DEGRADATION_LOOKBACK_S, SUPPRESSION_LOOKBACK_S,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    StaleInventory,
    SshTimeout,
    Other,
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub kind: FailureKind,
    pub at: Instant,
}

#[derive(Debug, Clone, Default)]
struct OfferFailureState {
    events: VecDeque<FailureEvent>,
}

/// Optional write-through persistence for failure state, consulted once at
/// startup and updated best-effort on every change. Never blocks the
/// request path — a failing write just gets logged and dropped.
#[async_trait]
pub trait FailurePersistence: Send + Sync {
    async fn replay(&self) -> Vec<(String, String, FailureEvent)>;
    async fn record(&self, provider: &str, offer_id: &str, event: FailureEvent);
}

/// A no-op persistence backend — the default, and what tests use.
#[derive(Debug, Default)]
pub struct NoopPersistence;

#[async_trait]
impl FailurePersistence for NoopPersistence {
    async fn replay(&self) -> Vec<(String, String, FailureEvent)> {
        Vec::new()
    }

    async fn record(&self, _provider: &str, _offer_id: &str, _event: FailureEvent) {}
}

pub struct FailureTracker {
    offers: RwLock<HashMap<(String, String), OfferFailureState>>,
    pairs: RwLock<HashMap<(String, String), HashMap<String, Instant>>>,
    persistence: Box<dyn FailurePersistence>,
}

impl std::fmt::Debug for FailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureTracker").finish_non_exhaustive()
    }
}

impl FailureTracker {
    pub fn new(persistence: Box<dyn FailurePersistence>) -> Self {
        Self {
            offers: RwLock::new(HashMap::new()),
            pairs: RwLock::new(HashMap::new()),
            persistence,
        }
    }

    /// Replay persisted state at startup. Best-effort: a persistence layer
    /// that returns nothing (e.g. `NoopPersistence`) just starts cold.
    pub async fn replay(&self) {
        for (provider, offer_id, event) in self.persistence.replay().await {
            let mut offers = self.offers.write().await;
            offers
                .entry((provider, offer_id))
                .or_default()
                .events
                .push_back(event);
        }
    }

    pub async fn record_failure(
        &self,
        provider: &str,
        offer_id: &str,
        gpu_model: &str,
        kind: FailureKind,
    ) {
        let now = Instant::now();
        {
            let mut offers = self.offers.write().await;
            let state = offers
                .entry((provider.to_string(), offer_id.to_string()))
                .or_default();
            state.events.push_back(FailureEvent { kind, at: now });
            prune(&mut state.events, now, Duration::from_secs(SUPPRESSION_LOOKBACK_S.max(PAIR_DEGRADATION_LOOKBACK_S) as u64));
        }
        {
            let mut pairs = self.pairs.write().await;
            pairs
                .entry((provider.to_string(), gpu_model.to_string()))
                .or_default()
                .insert(offer_id.to_string(), now);
        }
        self.persistence
            .record(provider, offer_id, FailureEvent { kind, at: now })
            .await;
    }

    /// Count of failures for this offer within the suppression lookback.
    pub async fn recent_failure_count(&self, provider: &str, offer_id: &str) -> u32 {
        let offers = self.offers.read().await;
        match offers.get(&(provider.to_string(), offer_id.to_string())) {
            Some(state) => count_within(&state.events, Duration::from_secs(SUPPRESSION_LOOKBACK_S as u64)),
            None => 0,
        }
    }

    /// Count of distinct offers within a (provider, gpu_model) pair that
    /// failed within the pair-degradation lookback.
    pub async fn pair_distinct_failure_count(&self, provider: &str, gpu_model: &str) -> u32 {
        let now = Instant::now();
        let pairs = self.pairs.read().await;
        match pairs.get(&(provider.to_string(), gpu_model.to_string())) {
            Some(map) => map
                .values()
                .filter(|at| now.saturating_duration_since(**at) <= Duration::from_secs(PAIR_DEGRADATION_LOOKBACK_S as u64))
                .count() as u32,
            None => 0,
        }
    }

    /// Drop events and pair entries older than both lookback windows. Call
    /// periodically (the inventory cache refresh loop is a natural place)
    /// so memory does not grow without bound.
    pub async fn decay(&self) {
        let now = Instant::now();
        let window = Duration::from_secs(SUPPRESSION_LOOKBACK_S.max(PAIR_DEGRADATION_LOOKBACK_S) as u64);
        {
            let mut offers = self.offers.write().await;
            offers.retain(|_, state| {
                prune(&mut state.events, now, window);
                !state.events.is_empty()
            });
        }
        {
            let mut pairs = self.pairs.write().await;
            for map in pairs.values_mut() {
                map.retain(|_, at| now.saturating_duration_since(*at) <= window);
            }
            pairs.retain(|_, map| !map.is_empty());
        }
    }
}

fn prune(events: &mut VecDeque<FailureEvent>, now: Instant, window: Duration) {
    while let Some(front) = events.front() {
        if now.saturating_duration_since(front.at) > window {
            events.pop_front();
        } else {
            break;
        }
    }
}

fn count_within(events: &VecDeque<FailureEvent>, window: Duration) -> u32 {
    let now = Instant::now();
    events
        .iter()
        .filter(|e| now.saturating_duration_since(e.at) <= window)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn three_failures_suppress_the_offer() {
        let tracker = FailureTracker::new(Box::new(NoopPersistence));
        for _ in 0..3 {
            tracker
                .record_failure("vastai", "o1", "A100", FailureKind::StaleInventory)
                .await;
        }
        let count = tracker.recent_failure_count("vastai", "o1").await;
        assert!(fleet_core::offer::is_suppressed(count));
    }

    #[tokio::test]
    async fn pair_degradation_counts_distinct_offers() {
        let tracker = FailureTracker::new(Box::new(NoopPersistence));
        tracker
            .record_failure("vastai", "o1", "A100", FailureKind::StaleInventory)
            .await;
        tracker
            .record_failure("vastai", "o2", "A100", FailureKind::StaleInventory)
            .await;
        tracker
            .record_failure("vastai", "o3", "A100", FailureKind::StaleInventory)
            .await;
        let count = tracker.pair_distinct_failure_count("vastai", "A100").await;
        assert_eq!(count, 3);
    }
}
