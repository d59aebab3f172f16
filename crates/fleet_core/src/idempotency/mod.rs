//! Idempotency primitives: cost-record key hashing.

pub mod hash;

pub use hash::{compute_cost_key, format_cost_key, CostKeyInput};
