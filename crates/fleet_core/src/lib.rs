#![forbid(unsafe_code)]

pub mod capability;
pub mod cost;
pub mod error;
pub mod idempotency;
pub mod offer;
pub mod reconcile;
pub mod session;

pub fn crate_bootstrapped() -> bool {
    true
}
