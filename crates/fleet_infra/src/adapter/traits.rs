//! The uniform contract every marketplace adapter implements.

use async_trait::async_trait;
use std::collections::HashMap;

use fleet_core::capability::AdapterCapabilities;
use fleet_core::offer::{Offer, OfferFilter};
use fleet_core::reconcile::ProviderInstanceRef;

/// Errors an adapter may raise, already normalized to the shared taxonomy.
/// Adapters are free to use whatever error type they like internally
/// (`reqwest::Error`, a provider-specific status code) and translate it
/// into one of these at the trait boundary — nothing above this layer
/// inspects a rendered message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    #[error("offer unavailable")]
    OfferUnavailable,
    #[error("stale inventory")]
    StaleInventory,
    #[error("insufficient disk: requested {requested_gb}GB, offer has {available_gb}GB")]
    InsufficientDisk { requested_gb: u32, available_gb: u32 },
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("provider rejected credentials")]
    AuthFailed,
    #[error("not found")]
    NotFound,
    #[error("transport error: {0}")]
    Io(String),
}

impl std::error::Error for AdapterError {}

/// A request to create one instance, always carrying the session-id tag so
/// the instance can be recovered by `list_all_instances` later.
#[derive(Debug, Clone)]
pub struct CreateInstanceRequest {
    pub offer_id: String,
    pub session_id_tag: String,
    pub docker_image: String,
    pub env: HashMap<String, String>,
    pub on_start_script: Option<String>,
    pub public_key: String,
    pub disk_gb: u32,
    pub exposed_ports: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatusHint {
    Starting,
    Running,
}

#[derive(Debug, Clone)]
pub struct CreatedInstance {
    pub provider_instance_id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub status_hint: InstanceStatusHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Starting,
    NotFound,
}

/// Uniform contract over one marketplace. Implementors own their own HTTP
/// client, credentials, and rate limiting; this trait only describes what
/// the rest of the system may ask of any provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn list_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>, AdapterError>;

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<CreatedInstance, AdapterError>;

    /// "Already gone" counts as success — callers never need to special-case it.
    async fn destroy_instance(&self, provider_instance_id: &str) -> Result<(), AdapterError>;

    async fn get_instance_status(
        &self,
        provider_instance_id: &str,
    ) -> Result<InstanceStatus, AdapterError>;

    /// Every instance carrying our session-id tag prefix, regardless of
    /// which local session (if any) still references it.
    async fn list_all_instances(&self) -> Result<Vec<ProviderInstanceRef>, AdapterError>;

    fn capabilities(&self) -> AdapterCapabilities;
}
