//! Offer shape and the filter/sort used when listing inventory.

/// An attribute bundle describing a rentable configuration at one provider.
/// Immutable once observed; identity is `(provider, id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub id: String,
    pub provider: String,
    pub gpu_model: String,
    pub gpu_count: u32,
    pub vram_gb: u32,
    pub price_per_hour: f64,
    pub location: String,
    pub reliability_score: f64,
    pub availability_confidence: f64,
    pub fetched_at_ms: u64,
    pub available: bool,
}

impl Offer {
    pub fn key(&self) -> (&str, &str) {
        (self.provider.as_str(), self.id.as_str())
    }
}

/// Caller-supplied constraints for browsing inventory.
#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    pub provider: Option<String>,
    pub gpu_model_substring: Option<String>,
    pub min_vram_gb: Option<u32>,
    pub max_price_per_hour: Option<f64>,
    pub min_gpu_count: Option<u32>,
    pub min_reliability: Option<f64>,
    pub min_availability_confidence: Option<f64>,
}

impl OfferFilter {
    pub fn matches(&self, offer: &Offer) -> bool {
        if !offer.available {
            return false;
        }
        if let Some(provider) = &self.provider {
            if &offer.provider != provider {
                return false;
            }
        }
        if let Some(needle) = &self.gpu_model_substring {
            if !offer.gpu_model.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(min_vram) = self.min_vram_gb {
            if offer.vram_gb < min_vram {
                return false;
            }
        }
        if let Some(max_price) = self.max_price_per_hour {
            if offer.price_per_hour > max_price {
                return false;
            }
        }
        if let Some(min_gpu_count) = self.min_gpu_count {
            if offer.gpu_count < min_gpu_count {
                return false;
            }
        }
        if let Some(min_reliability) = self.min_reliability {
            if offer.reliability_score < min_reliability {
                return false;
            }
        }
        if let Some(min_confidence) = self.min_availability_confidence {
            if offer.availability_confidence < min_confidence {
                return false;
            }
        }
        true
    }
}

/// Filter and sort a batch of offers by ascending price. Offers that fail
/// `filter` are dropped entirely rather than reordered to the tail — callers
/// must not see filtered-out offers under any pagination window.
pub fn filter_and_sort(mut offers: Vec<Offer>, filter: &OfferFilter) -> Vec<Offer> {
    offers.retain(|o| filter.matches(o));
    offers.sort_by(|a, b| {
        a.price_per_hour
            .partial_cmp(&b.price_per_hour)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    offers
}

/// Scope for a "find comparable offers" query, each with its own price
/// ceiling multiplier relative to the original offer's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparableScope {
    SameGpu,
    SameVram,
    Any,
}

impl ComparableScope {
    pub fn price_ceiling_multiplier(self) -> f64 {
        match self {
            ComparableScope::SameGpu => 1.2,
            ComparableScope::SameVram => 1.5,
            ComparableScope::Any => 2.0,
        }
    }
}

pub const MAX_COMPARABLE_CANDIDATES: usize = 5;

/// Whether `candidate` is in-scope relative to `original` under `scope`,
/// ignoring confidence/suppression/exclusion (those are applied by the
/// caller, who has access to the failure tracker this module does not).
pub fn in_comparable_scope(original: &Offer, candidate: &Offer, scope: ComparableScope) -> bool {
    if candidate.key() == original.key() {
        return false;
    }
    let price_ok = candidate.price_per_hour <= original.price_per_hour * scope.price_ceiling_multiplier();
    if !price_ok {
        return false;
    }
    match scope {
        ComparableScope::SameGpu => candidate.gpu_model == original.gpu_model,
        ComparableScope::SameVram => candidate.vram_gb == original.vram_gb,
        ComparableScope::Any => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(id: &str, price: f64, available: bool) -> Offer {
        Offer {
            id: id.to_string(),
            provider: "vastai".to_string(),
            gpu_model: "A100".to_string(),
            gpu_count: 1,
            vram_gb: 80,
            price_per_hour: price,
            location: "us-east".to_string(),
            reliability_score: 0.9,
            availability_confidence: 1.0,
            fetched_at_ms: 0,
            available,
        }
    }

    #[test]
    fn unavailable_offers_are_filtered_out() {
        let offers = vec![offer("a", 0.5, true), offer("b", 0.2, false)];
        let result = filter_and_sort(offers, &OfferFilter::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "a");
    }

    #[test]
    fn results_sorted_by_price_ascending() {
        let offers = vec![offer("a", 0.9, true), offer("b", 0.3, true), offer("c", 0.6, true)];
        let result = filter_and_sort(offers, &OfferFilter::default());
        let prices: Vec<f64> = result.iter().map(|o| o.price_per_hour).collect();
        assert_eq!(prices, vec![0.3, 0.6, 0.9]);
    }

    #[test]
    fn comparable_scope_price_ceilings() {
        let original = offer("x", 0.40, true);
        let mut ok = offer("y", 0.48, true);
        ok.gpu_model = "A100".to_string();
        assert!(in_comparable_scope(&original, &ok, ComparableScope::SameGpu));

        let mut too_expensive = offer("z", 0.49, true);
        too_expensive.gpu_model = "A100".to_string();
        // 0.40 * 1.2 == 0.48, so 0.49 is just over the same-gpu ceiling.
        assert!(!in_comparable_scope(&original, &too_expensive, ComparableScope::SameGpu));
    }
}
