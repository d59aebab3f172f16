pub mod degradation;
pub mod model;

pub use degradation::{
    effective_multiplier, failure_multiplier, is_suppressed, staleness_factor,
    PAIR_DEGRADATION_DISTINCT_THRESHOLD, PAIR_DEGRADATION_LOOKBACK_S,
    SUPPRESSION_DURATION_S, SUPPRESSION_FAILURE_THRESHOLD, SUPPRESSION_LOOKBACK_S,
};
pub use model::{
    filter_and_sort, in_comparable_scope, ComparableScope, Offer, OfferFilter,
    MAX_COMPARABLE_CANDIDATES,
};
