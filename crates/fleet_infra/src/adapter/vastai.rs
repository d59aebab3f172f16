//! Real marketplace adapter, talking to the Vast.ai REST API over `reqwest`.
//! Every call goes through the shared [`RateLimiter`] first and reports
//! success/failure back to it so repeated 429s or 5xxs back off instead of
//! hammering the provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use fleet_core::capability::AdapterCapabilities;
use fleet_core::offer::{Offer, OfferFilter};
use fleet_core::reconcile::ProviderInstanceRef;

use crate::adapter::rate_limit::{BackoffConfig, RateLimiter};
use crate::adapter::traits::{
    AdapterError, CreateInstanceRequest, CreatedInstance, InstanceStatus, InstanceStatusHint,
    ProviderAdapter,
};

const SESSION_TAG_PREFIX: &str = "fleet-";

/// One entry from Vast.ai's `/bundles` listing. Optional fields reflect the
/// provider's own inconsistency about which attributes are populated for
/// every instance type.
#[derive(Debug, Clone, Deserialize)]
struct BundleOffer {
    id: u64,
    #[serde(default)]
    gpu_name: String,
    #[serde(default)]
    num_gpus: u32,
    #[serde(default)]
    gpu_total_ram: u32,
    #[serde(rename = "dph_total", default)]
    dollars_per_hour: f64,
    #[serde(default)]
    geolocation: String,
    #[serde(default)]
    reliability2: f64,
    #[serde(default = "default_true")]
    rentable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BundlesResponse {
    #[serde(default)]
    offers: Vec<BundleOffer>,
}

#[derive(Debug, Serialize)]
struct CreateInstancePayload<'a> {
    client_id: &'a str,
    image: &'a str,
    env: serde_json::Value,
    onstart: Option<&'a str>,
    ssh_key: &'a str,
    disk: u32,
    #[serde(rename = "label")]
    session_tag: String,
}

#[derive(Debug, Deserialize)]
struct CreateInstanceResponse {
    success: bool,
    new_contract: u64,
}

#[derive(Debug, Deserialize)]
struct InstanceRecord {
    id: u64,
    #[serde(default)]
    label: String,
    #[serde(default)]
    actual_status: String,
    #[serde(default)]
    ssh_host: String,
    #[serde(default)]
    ssh_port: u16,
}

#[derive(Debug, Deserialize)]
struct InstancesResponse {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

pub struct VastAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter,
    capabilities: AdapterCapabilities,
}

impl VastAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url("https://console.vast.ai/api/v0", api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("static reqwest client config"),
            base_url: base_url.into(),
            api_key: api_key.into(),
            rate_limiter: RateLimiter::new(5.0, 2.0, BackoffConfig::default()),
            capabilities: AdapterCapabilities {
                idle_detection: false,
                instance_tags: true,
                spot_pricing: true,
            },
        }
    }

    fn session_tag(session_id: &str) -> String {
        format!("{SESSION_TAG_PREFIX}{session_id}")
    }

    fn untag(label: &str) -> Option<&str> {
        label.strip_prefix(SESSION_TAG_PREFIX)
    }

    async fn translate_response_error(response: reqwest::Response) -> AdapterError {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return AdapterError::RateLimited;
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return AdapterError::AuthFailed;
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return AdapterError::NotFound;
        }
        let body = response.text().await.unwrap_or_default();
        AdapterError::Io(format!("http {status}: {body}"))
    }
}

#[async_trait]
impl ProviderAdapter for VastAiAdapter {
    fn name(&self) -> &str {
        "vastai"
    }

    async fn list_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>, AdapterError> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/bundles", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;

        if !response.status().is_success() {
            let error = Self::translate_response_error(response).await;
            self.rate_limiter.record_failure().await;
            return Err(error);
        }
        self.rate_limiter.record_success().await;

        let parsed: BundlesResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;

        let offers: Vec<Offer> = parsed
            .offers
            .into_iter()
            .map(|bundle| Offer {
                id: bundle.id.to_string(),
                provider: "vastai".to_string(),
                gpu_model: bundle.gpu_name,
                gpu_count: bundle.num_gpus,
                vram_gb: bundle.gpu_total_ram / 1024,
                price_per_hour: bundle.dollars_per_hour,
                location: bundle.geolocation,
                reliability_score: bundle.reliability2,
                availability_confidence: 1.0,
                fetched_at_ms: 0,
                available: bundle.rentable,
            })
            .collect();

        Ok(fleet_core::offer::filter_and_sort(offers, filter))
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<CreatedInstance, AdapterError> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/asks/{}/", self.base_url, request.offer_id);
        let env_value = serde_json::to_value(&request.env)
            .map_err(|err| AdapterError::Io(err.to_string()))?;
        let payload = CreateInstancePayload {
            client_id: "me",
            image: &request.docker_image,
            env: env_value,
            onstart: request.on_start_script.as_deref(),
            ssh_key: &request.public_key,
            disk: request.disk_gb,
            session_tag: Self::session_tag(&request.session_id_tag),
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            self.rate_limiter.record_failure().await;
            return Err(AdapterError::OfferUnavailable);
        }
        if !response.status().is_success() {
            let error = Self::translate_response_error(response).await;
            self.rate_limiter.record_failure().await;
            return Err(error);
        }
        self.rate_limiter.record_success().await;

        let parsed: CreateInstanceResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;
        if !parsed.success {
            return Err(AdapterError::OfferUnavailable);
        }

        Ok(CreatedInstance {
            provider_instance_id: parsed.new_contract.to_string(),
            host: String::new(),
            port: 0,
            user: "root".to_string(),
            status_hint: InstanceStatusHint::Starting,
        })
    }

    async fn destroy_instance(&self, provider_instance_id: &str) -> Result<(), AdapterError> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/instances/{}/", self.base_url, provider_instance_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            self.rate_limiter.record_success().await;
            return Ok(());
        }
        if !response.status().is_success() {
            let error = Self::translate_response_error(response).await;
            self.rate_limiter.record_failure().await;
            return Err(error);
        }
        self.rate_limiter.record_success().await;
        Ok(())
    }

    async fn get_instance_status(
        &self,
        provider_instance_id: &str,
    ) -> Result<InstanceStatus, AdapterError> {
        match self
            .list_all_instances()
            .await?
            .into_iter()
            .find(|i| i.provider_instance_id == provider_instance_id)
        {
            None => Ok(InstanceStatus::NotFound),
            Some(_) => Ok(InstanceStatus::Running),
        }
    }

    async fn list_all_instances(&self) -> Result<Vec<ProviderInstanceRef>, AdapterError> {
        self.rate_limiter.acquire().await;
        let url = format!("{}/instances", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;

        if !response.status().is_success() {
            let error = Self::translate_response_error(response).await;
            self.rate_limiter.record_failure().await;
            return Err(error);
        }
        self.rate_limiter.record_success().await;

        let parsed: InstancesResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::Io(err.to_string()))?;

        Ok(parsed
            .instances
            .into_iter()
            .filter_map(|instance| {
                Self::untag(&instance.label).map(|session_id| ProviderInstanceRef {
                    provider_instance_id: instance.id.to_string(),
                    tagged_session_id: session_id.to_string(),
                })
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

    #[test]
    fn session_tag_round_trips_through_the_label_prefix() {
        let tag = VastAiAdapter::session_tag("sess-abc123");
        assert_eq!(tag, "fleet-sess-abc123");
        assert_eq!(VastAiAdapter::untag(&tag), Some("sess-abc123"));
    }

    #[test]
    fn an_unrelated_label_is_not_mistaken_for_one_of_ours() {
        assert_eq!(VastAiAdapter::untag("someone-elses-box"), None);
    }

    #[test]
    fn a_bundle_with_only_required_fields_deserializes_with_sane_defaults() {
        let raw = r#"{"offers": [{"id": 42}]}"#;
        let parsed: BundlesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.offers.len(), 1);
        assert_eq!(parsed.offers[0].id, 42);
        assert!(parsed.offers[0].rentable);
        assert_eq!(parsed.offers[0].dollars_per_hour, 0.0);
    }
}
