//! Multi-provider inventory cache: stale-while-revalidate per provider,
//! concurrent fan-out across providers, and availability-confidence
//! degradation from both staleness and recent failure history.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

use fleet_core::error::{FleetError, FleetErrorKind};
use fleet_core::offer::{
    effective_multiplier, in_comparable_scope, ComparableScope, Offer, OfferFilter,
    MAX_COMPARABLE_CANDIDATES,
};

use crate::adapter::{AdapterError, ProviderAdapter};
use crate::inventory::failures::FailureTracker;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub soft_expiry_ratio: f64,
    pub error_backoff: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    offers: Vec<Offer>,
    fetched_at: Instant,
    error: Option<AdapterError>,
    error_at: Option<Instant>,
    refreshing: bool,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            offers: Vec::new(),
            fetched_at: Instant::now() - Duration::from_secs(3600 * 24),
            error: None,
            error_at: None,
            refreshing: false,
        }
    }
}

pub struct InventoryCache {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    failures: Arc<FailureTracker>,
    config: CacheConfig,
    /// Lets the cache spawn a background refresh against itself without the
    /// caller threading an `Arc` through every method. Set once at
    /// construction via `Arc::new_cyclic`; always upgradable for the
    /// lifetime of the cache since the cache holds the strong count.
    self_ref: Weak<InventoryCache>,
}

impl InventoryCache {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        failures: Arc<FailureTracker>,
        config: CacheConfig,
    ) -> Arc<Self> {
        let entries: HashMap<String, CacheEntry> = adapters
            .keys()
            .map(|name| (name.clone(), CacheEntry::empty()))
            .collect();
        Arc::new_cyclic(|self_ref| Self {
            adapters,
            entries: RwLock::new(entries),
            failures,
            config,
            self_ref: self_ref.clone(),
        })
    }

    /// List offers matching `filter`, fanning out to every provider unless
    /// `filter.provider` names one. If every consulted provider errored,
    /// the aggregate call fails with `all-providers-failed`; a partial
    /// success returns whatever providers did answer.
    pub async fn list_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>, FleetError> {
        let providers: Vec<&String> = match &filter.provider {
            Some(name) => self.adapters.keys().filter(|k| *k == name).collect(),
            None => self.adapters.keys().collect(),
        };

        let mut all_offers = Vec::new();
        let mut all_errored = !providers.is_empty();
        for provider in &providers {
            match self.offers_for_provider(provider).await {
                Ok(offers) => {
                    all_errored = false;
                    all_offers.extend(offers);
                }
                Err(_) => continue,
            }
        }

        if all_errored {
            return Err(FleetError::new(
                FleetErrorKind::AllProvidersFailed,
                "inventory",
                "every provider failed to return offers",
            ));
        }

        Ok(fleet_core::offer::filter_and_sort(all_offers, filter))
    }

    /// Degraded + filtered offers for a single provider, honoring
    /// stale-while-revalidate.
    async fn offers_for_provider(&self, provider: &str) -> Result<Vec<Offer>, AdapterError> {
        let now = Instant::now();
        let soft_expiry = self.config.ttl.mul_f64(self.config.soft_expiry_ratio);

        let (offers, fetched_at, schedule_refresh) = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(provider.to_string()).or_insert_with(CacheEntry::empty);

            if let (Some(error), Some(error_at)) = (&entry.error, entry.error_at) {
                if now.saturating_duration_since(error_at) < self.config.error_backoff {
                    return Err(error.clone());
                }
            }

            let age = now.saturating_duration_since(entry.fetched_at);
            if age < soft_expiry {
                (entry.offers.clone(), entry.fetched_at, false)
            } else if age < self.config.ttl && entry.error.is_none() {
                let should_refresh = !entry.refreshing;
                if should_refresh {
                    entry.refreshing = true;
                }
                (entry.offers.clone(), entry.fetched_at, should_refresh)
            } else {
                (Vec::new(), entry.fetched_at, false)
            }
        };

        if schedule_refresh {
            self.spawn_background_refresh(provider.to_string());
        }

        let offers = if schedule_refresh || !offers.is_empty() {
            offers
        } else {
            self.refresh(provider).await?
        };

        Ok(self.apply_degradation(provider, offers, fetched_at, now).await)
    }

    /// Fire-and-forget: the caller already has a usable (stale) snapshot,
    /// so this task's only job is to land a fresh one in the entry before
    /// the next caller crosses hard expiry.
    fn spawn_background_refresh(&self, provider: String) {
        let Some(cache) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = cache.refresh(&provider).await {
                warn!(provider = %provider, error = %err, "background inventory refresh failed");
            }
        });
    }

    async fn refresh(&self, provider: &str) -> Result<Vec<Offer>, AdapterError> {
        let adapter = self
            .adapters
            .get(provider)
            .expect("refresh called for a provider without an adapter");

        let result = adapter.list_offers(&OfferFilter::default()).await;
        let mut entries = self.entries.write().await;
        let entry = entries.entry(provider.to_string()).or_insert_with(CacheEntry::empty);
        entry.refreshing = false;

        match result {
            Ok(offers) => {
                entry.offers = offers.clone();
                entry.fetched_at = Instant::now();
                entry.error = None;
                entry.error_at = None;
                Ok(offers)
            }
            Err(error) => {
                entry.error = Some(error.clone());
                entry.error_at = Some(Instant::now());
                Err(error)
            }
        }
    }

    async fn apply_degradation(
        &self,
        provider: &str,
        offers: Vec<Offer>,
        fetched_at: Instant,
        now: Instant,
    ) -> Vec<Offer> {
        let age_s = now.saturating_duration_since(fetched_at).as_secs_f64();
        let mut result = Vec::with_capacity(offers.len());
        for mut offer in offers {
            let recent_failures = self
                .failures
                .recent_failure_count(provider, &offer.id)
                .await;
            let pair_failures = self
                .failures
                .pair_distinct_failure_count(provider, &offer.gpu_model)
                .await;
            match effective_multiplier(age_s, recent_failures, pair_failures) {
                Some(multiplier) => {
                    offer.availability_confidence *= multiplier;
                    result.push(offer);
                }
                None => continue, // suppressed
            }
        }
        result
    }

    /// Refresh every provider synchronously and force the entry past its
    /// soft expiry, regardless of current staleness. Used by callers that
    /// want a guaranteed-fresh read (e.g. right before a create attempt).
    pub async fn force_refresh_all(&self) {
        for provider in self.adapters.keys() {
            let _ = self.refresh(provider).await;
        }
    }

    /// Up to [`MAX_COMPARABLE_CANDIDATES`] alternatives to `original`,
    /// excluding anything in `excluded`, sorted by effective confidence
    /// descending then price ascending, within the scope's price ceiling.
    pub async fn find_comparable(
        &self,
        original: &Offer,
        scope: ComparableScope,
        excluded: &[(String, String)],
    ) -> Result<Vec<Offer>, FleetError> {
        let all = self.list_offers(&OfferFilter::default()).await?;
        let mut candidates: Vec<Offer> = all
            .into_iter()
            .filter(|candidate| in_comparable_scope(original, candidate, scope))
            .filter(|candidate| {
                !excluded
                    .iter()
                    .any(|(p, id)| p == &candidate.provider && id == &candidate.id)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.availability_confidence
                .partial_cmp(&a.availability_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.price_per_hour
                        .partial_cmp(&b.price_per_hour)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        candidates.truncate(MAX_COMPARABLE_CANDIDATES);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    fn offer(id: &str, provider: &str, price: f64) -> Offer {
        Offer {
            id: id.to_string(),
            provider: provider.to_string(),
            gpu_model: "A100".to_string(),
            gpu_count: 1,
            vram_gb: 80,
            price_per_hour: price,
            location: "us-east".to_string(),
            reliability_score: 0.9,
            availability_confidence: 1.0,
            fetched_at_ms: 0,
            available: true,
        }
    }

    fn test_cache(adapters: HashMap<String, Arc<dyn ProviderAdapter>>) -> Arc<InventoryCache> {
        InventoryCache::new(
            adapters,
            Arc::new(FailureTracker::new(Box::new(
                crate::inventory::failures::NoopPersistence,
            ))),
            CacheConfig {
                ttl: Duration::from_secs(60),
                soft_expiry_ratio: 0.75,
                error_backoff: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test]
    async fn lists_offers_from_a_single_provider() {
        let adapter: Arc<dyn ProviderAdapter> =
            Arc::new(MockAdapter::new("vastai", vec![offer("o1", "vastai", 0.5)]));
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert("vastai".to_string(), adapter);
        let cache = test_cache(adapters);

        let offers = cache.list_offers(&OfferFilter::default()).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].id, "o1");
    }

    #[tokio::test]
    async fn partial_provider_failure_still_returns_the_rest() {
        let good: Arc<dyn ProviderAdapter> =
            Arc::new(MockAdapter::new("vastai", vec![offer("o1", "vastai", 0.5)]));
        let bad: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter::new("tensordock", vec![]));
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert("vastai".to_string(), good);
        adapters.insert("tensordock".to_string(), bad);
        let cache = test_cache(adapters);

        let offers = cache.list_offers(&OfferFilter::default()).await.unwrap();
        assert_eq!(offers.len(), 1);
    }

    #[tokio::test]
    async fn find_comparable_excludes_named_offers() {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter::new(
            "vastai",
            vec![offer("o1", "vastai", 0.4), offer("o2", "vastai", 0.6)],
        ));
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert("vastai".to_string(), adapter);
        let cache = test_cache(adapters);

        let original = offer("o1", "vastai", 0.4);
        let excluded = vec![("vastai".to_string(), "o1".to_string())];
        let candidates = cache
            .find_comparable(&original, ComparableScope::SameGpu, &excluded)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "o2");
    }
}
