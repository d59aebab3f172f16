pub mod cache;
pub mod failures;

pub use cache::{CacheConfig, InventoryCache};
pub use failures::{FailureEvent, FailureKind, FailurePersistence, FailureTracker, NoopPersistence};
