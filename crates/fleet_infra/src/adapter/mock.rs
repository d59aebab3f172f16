//! An in-process marketplace used by the test suite and local development.
//! Behaves like a real adapter (offers, create, destroy, tag-based listing)
//! without any network access.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use fleet_core::capability::AdapterCapabilities;
use fleet_core::offer::{Offer, OfferFilter};
use fleet_core::reconcile::ProviderInstanceRef;

use crate::adapter::traits::{
    AdapterError, CreateInstanceRequest, CreatedInstance, InstanceStatus, InstanceStatusHint,
    ProviderAdapter,
};

#[derive(Debug, Clone)]
struct MockInstance {
    provider_instance_id: String,
    session_id_tag: String,
    present: bool,
}

/// Controls per-offer scripted failures so tests can exercise the
/// offer-unavailable / stale-inventory / auto-retry paths deterministically.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFailures {
    pub fail_create_for_offer: HashMap<String, AdapterError>,
}

#[derive(Debug)]
pub struct MockAdapter {
    name: String,
    offers: Mutex<Vec<Offer>>,
    instances: Mutex<Vec<MockInstance>>,
    failures: Mutex<ScriptedFailures>,
    capabilities: AdapterCapabilities,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>, offers: Vec<Offer>) -> Self {
        Self {
            name: name.into(),
            offers: Mutex::new(offers),
            instances: Mutex::new(Vec::new()),
            failures: Mutex::new(ScriptedFailures::default()),
            capabilities: AdapterCapabilities {
                idle_detection: true,
                instance_tags: true,
                spot_pricing: false,
            },
        }
    }

    pub async fn script_failure(&self, offer_id: impl Into<String>, error: AdapterError) {
        self.failures
            .lock()
            .await
            .fail_create_for_offer
            .insert(offer_id.into(), error);
    }

    /// Remove a provider-side instance without going through `destroy_instance`,
    /// simulating an out-of-band deletion (the ghost-repair scenario).
    pub async fn delete_out_of_band(&self, provider_instance_id: &str) {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances
            .iter_mut()
            .find(|i| i.provider_instance_id == provider_instance_id)
        {
            instance.present = false;
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>, AdapterError> {
        let offers = self.offers.lock().await;
        Ok(fleet_core::offer::filter_and_sort(offers.clone(), filter))
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<CreatedInstance, AdapterError> {
        if let Some(error) = self
            .failures
            .lock()
            .await
            .fail_create_for_offer
            .get(&request.offer_id)
        {
            return Err(error.clone());
        }

        let offers = self.offers.lock().await;
        let offer = offers
            .iter()
            .find(|o| o.id == request.offer_id)
            .ok_or(AdapterError::OfferUnavailable)?;
        if !offer.available {
            return Err(AdapterError::OfferUnavailable);
        }
        drop(offers);

        let provider_instance_id = format!("mock-{}", Uuid::new_v4());
        let mut instances = self.instances.lock().await;
        instances.push(MockInstance {
            provider_instance_id: provider_instance_id.clone(),
            session_id_tag: request.session_id_tag.clone(),
            present: true,
        });

        Ok(CreatedInstance {
            provider_instance_id,
            host: "127.0.0.1".to_string(),
            port: 22,
            user: "root".to_string(),
            status_hint: InstanceStatusHint::Starting,
        })
    }

    async fn destroy_instance(&self, provider_instance_id: &str) -> Result<(), AdapterError> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances
            .iter_mut()
            .find(|i| i.provider_instance_id == provider_instance_id)
        {
            instance.present = false;
        }
        // Already-gone is success, same as a real marketplace.
        Ok(())
    }

    async fn get_instance_status(
        &self,
        provider_instance_id: &str,
    ) -> Result<InstanceStatus, AdapterError> {
        let instances = self.instances.lock().await;
        match instances
            .iter()
            .find(|i| i.provider_instance_id == provider_instance_id)
        {
            Some(instance) if instance.present => Ok(InstanceStatus::Running),
            _ => Ok(InstanceStatus::NotFound),
        }
    }

    async fn list_all_instances(&self) -> Result<Vec<ProviderInstanceRef>, AdapterError> {
        let instances = self.instances.lock().await;
        Ok(instances
            .iter()
            .filter(|i| i.present)
            .map(|i| ProviderInstanceRef {
                provider_instance_id: i.provider_instance_id.clone(),
                tagged_session_id: i.session_id_tag.clone(),
            })
            .collect())
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(id: &str, price: f64) -> Offer {
        Offer {
            id: id.to_string(),
            provider: "mock".to_string(),
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

    fn create_request(offer_id: &str, session_id: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            offer_id: offer_id.to_string(),
            session_id_tag: session_id.to_string(),
            docker_image: "image".to_string(),
            env: HashMap::new(),
            on_start_script: None,
            public_key: "ssh-ed25519 AAAA".to_string(),
            disk_gb: 40,
            exposed_ports: vec![],
        }
    }

    #[tokio::test]
    async fn create_then_destroy_round_trips() {
        let adapter = MockAdapter::new("mock", vec![offer("o1", 0.5)]);
        let created = adapter
            .create_instance(&create_request("o1", "sess-1"))
            .await
            .unwrap();
        let all = adapter.list_all_instances().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].tagged_session_id, "sess-1");

        adapter
            .destroy_instance(&created.provider_instance_id)
            .await
            .unwrap();
        let status = adapter
            .get_instance_status(&created.provider_instance_id)
            .await
            .unwrap();
        assert_eq!(status, InstanceStatus::NotFound);
    }

    #[tokio::test]
    async fn scripted_failure_is_returned_verbatim() {
        let adapter = MockAdapter::new("mock", vec![offer("o1", 0.5)]);
        adapter
            .script_failure("o1", AdapterError::OfferUnavailable)
            .await;
        let result = adapter.create_instance(&create_request("o1", "sess-1")).await;
        assert_eq!(result, Err(AdapterError::OfferUnavailable));
    }

    #[tokio::test]
    async fn out_of_band_deletion_is_observable_via_status() {
        let adapter = MockAdapter::new("mock", vec![offer("o1", 0.5)]);
        let created = adapter
            .create_instance(&create_request("o1", "sess-1"))
            .await
            .unwrap();
        adapter
            .delete_out_of_band(&created.provider_instance_id)
            .await;
        let all = adapter.list_all_instances().await.unwrap();
        assert!(all.is_empty());
    }
}
