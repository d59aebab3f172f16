pub mod mock;
pub mod rate_limit;
pub mod traits;
pub mod vastai;

pub use mock::MockAdapter;
pub use rate_limit::{BackoffConfig, RateLimiter};
pub use traits::{
    AdapterError, CreateInstanceRequest, CreatedInstance, InstanceStatus, InstanceStatusHint,
    ProviderAdapter,
};
pub use vastai::VastAiAdapter;
