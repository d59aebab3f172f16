//! The exactly-once session<->instance provisioning protocol: pre-book,
//! ask the provider, bind, verify reachability, and destroy-on-failure if
//! any later stage cannot complete. Modeled as a short-circuiting staged
//! pipeline, the same shape as other gate chains in this codebase: each
//! stage either advances or the whole attempt fails closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use fleet_core::error::{FleetError, FleetErrorKind};
use fleet_core::offer::{ComparableScope, Offer};
use fleet_core::session::{
    apply_event, validate_reservation_hours, ReachabilityHandle, Session, SessionConfig,
    SessionEvent, SessionStatus,
};

use crate::adapter::{AdapterError, CreateInstanceRequest, InstanceStatus, ProviderAdapter};
use crate::config::FleetConfig;
use crate::inventory::{FailureKind, FailureTracker, InventoryCache};
use crate::reachability::ReachabilityVerifier;
use crate::store::SessionStore;

/// Everything needed to provision one session, before any provider has been
/// contacted.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub consumer_id: String,
    pub offer: Offer,
    pub session_config: SessionConfig,
    pub docker_image: String,
    pub env: HashMap<String, String>,
    pub on_start_script: Option<String>,
    pub public_key: String,
    pub disk_gb: u32,
    pub exposed_ports: Vec<u16>,
    /// Whether an `offer-unavailable`/`stale-inventory` rejection should be
    /// retried against a comparable offer instead of failing the session
    /// outright. Off by default — a caller with no tolerance for landing on
    /// a different offer than it asked for must say so explicitly.
    pub auto_retry: bool,
    /// Caller-supplied ceiling on auto-retries, clamped to the global
    /// `provisioner_max_retries`. `None` uses the global cap directly.
    pub max_retries: Option<u32>,
    pub comparable_scope: ComparableScope,
}

#[derive(Debug, Default)]
pub struct ProvisionerMetrics {
    pub attempts: u32,
    pub auto_retries: u32,
    pub verify_timeouts: u32,
    pub destroy_unverified: u32,
}

pub struct Provisioner {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    store: Arc<dyn SessionStore>,
    inventory: Arc<InventoryCache>,
    failures: Arc<FailureTracker>,
    reachability: Arc<dyn ReachabilityVerifier>,
    config: FleetConfig,
}

impl Provisioner {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        store: Arc<dyn SessionStore>,
        inventory: Arc<InventoryCache>,
        failures: Arc<FailureTracker>,
        reachability: Arc<dyn ReachabilityVerifier>,
        config: FleetConfig,
    ) -> Self {
        Self {
            adapters,
            store,
            inventory,
            failures,
            reachability,
            config,
        }
    }

    /// Run the full P1-P5 protocol, returning the `Running` session on
    /// success. On any unrecoverable failure the session is left `Failed`
    /// in the store (never deleted) and the error explains why. A
    /// create-rejection (P2) and a verification timeout (P4) are both
    /// retryable against a comparable offer when the request opted in —
    /// the loop below reruns P2-P4 from scratch for each candidate.
    pub async fn provision(
        &self,
        request: ProvisionRequest,
        metrics: &mut ProvisionerMetrics,
    ) -> Result<Session, FleetError> {
        validate_reservation_hours(
            request.session_config.reservation_hours,
            request.session_config.hard_max_override,
        )
        .map_err(|_| {
            FleetError::new(
                FleetErrorKind::HardMaxExceeded,
                &request.consumer_id,
                "requested reservation hours outside the allowed range",
            )
        })?;

        // P1: pre-book. A durable Pending row reserves the consumer+offer
        // slot (I2) before any provider call is made.
        let session_id = format!("sess-{}", Uuid::new_v4());
        let now_ms = now_ms();
        let reservation_ms = u64::from(request.session_config.reservation_hours) * 3_600_000;
        let mut session = Session {
            id: session_id.clone(),
            consumer_id: request.consumer_id.clone(),
            offer_id: request.offer.id.clone(),
            provider: request.offer.provider.clone(),
            gpu_model: request.offer.gpu_model.clone(),
            provider_instance_id: None,
            config: request.session_config.clone(),
            reachability: None,
            status: SessionStatus::Pending,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + reservation_ms,
            stopped_at_ms: None,
            last_error: None,
            price_per_hour: request.offer.price_per_hour,
            retry_count: 0,
        };
        self.store.insert(session.clone()).await?;

        let max_retries = request
            .max_retries
            .unwrap_or(self.config.provisioner_max_retries)
            .min(self.config.provisioner_max_retries);
        let mut candidate = request.offer.clone();
        let mut excluded = Vec::new();

        loop {
            metrics.attempts += 1;
            let adapter = self.adapters.get(&candidate.provider).ok_or_else(|| {
                FleetError::new(FleetErrorKind::NotFound, &candidate.provider, "unknown provider")
            })?;

            let create_request = CreateInstanceRequest {
                offer_id: candidate.id.clone(),
                session_id_tag: session.id.clone(),
                docker_image: request.docker_image.clone(),
                env: request.env.clone(),
                on_start_script: request.on_start_script.clone(),
                public_key: request.public_key.clone(),
                disk_gb: request.disk_gb,
                exposed_ports: request.exposed_ports.clone(),
            };

            // P2: ask the provider.
            let created = match adapter.create_instance(&create_request).await {
                Ok(created) => created,
                Err(err @ (AdapterError::OfferUnavailable | AdapterError::StaleInventory)) => {
                    self.failures
                        .record_failure(
                            &candidate.provider,
                            &candidate.id,
                            &candidate.gpu_model,
                            FailureKind::StaleInventory,
                        )
                        .await;

                    if self
                        .retry_against_comparable(
                            &request,
                            &mut session,
                            &mut candidate,
                            &mut excluded,
                            max_retries,
                            metrics,
                        )
                        .await?
                    {
                        self.store.update(session.clone()).await?;
                        continue;
                    }

                    session.status = SessionStatus::Failed;
                    session.last_error = Some(err.to_string());
                    self.store.update(session.clone()).await?;
                    return Err(translate_adapter_error(&session.id, err));
                }
                Err(other) => {
                    session.status = SessionStatus::Failed;
                    session.last_error = Some(other.to_string());
                    self.store.update(session.clone()).await?;
                    return Err(translate_adapter_error(&session.id, other));
                }
            };

            // P3: bind. Provider accepted the call; record the instance id
            // before anything else can fail, so a crash here still leaves a
            // recoverable trail for the reconciler.
            session.status = apply_event(session.status, SessionEvent::Bound)
                .map_err(|_| transition_error(&session.id))?;
            session.provider_instance_id = Some(created.provider_instance_id.clone());
            session.offer_id = candidate.id.clone();
            session.provider = candidate.provider.clone();
            session.gpu_model = candidate.gpu_model.clone();
            session.price_per_hour = candidate.price_per_hour;
            session.reachability = Some(ReachabilityHandle {
                host: created.host.clone(),
                port: created.port,
                user: created.user.clone(),
                api_endpoint: None,
            });
            self.store.update(session.clone()).await?;

            // P4: verify reachability within the configured deadline.
            let handle = session.reachability.clone().expect("just set above");
            let reachable =
                self.reachability.verify(&handle, self.config.reachability_timeout).await;
            if reachable {
                session.status = apply_event(session.status, SessionEvent::VerifiedReachable)
                    .map_err(|_| transition_error(&session.id))?;
                self.store.update(session.clone()).await?;
                info!(session_id = %session.id, provider = %session.provider, "session is running");
                return Ok(session);
            }

            metrics.verify_timeouts += 1;
            warn!(session_id = %session.id, "reachability verification timed out");

            if self
                .retry_against_comparable(
                    &request,
                    &mut session,
                    &mut candidate,
                    &mut excluded,
                    max_retries,
                    metrics,
                )
                .await?
            {
                // Tear down the unreachable instance and rewind to Pending
                // so the next iteration's P3 bind applies cleanly. This does
                // not finalize the session — `destroy_and_fail` below is the
                // terminal path, reached only once retries are exhausted.
                let _ = self.verified_destroy(&session).await;
                session.provider_instance_id = None;
                session.reachability = None;
                session.status = SessionStatus::Pending;
                self.store.update(session.clone()).await?;
                continue;
            }

            warn!(session_id = %session.id, "destroying instance after exhausting retries");
            self.destroy_and_fail(&mut session, FleetErrorKind::VerifyTimeout, metrics).await?;
            return Err(FleetError::new(
                FleetErrorKind::VerifyTimeout,
                &session.id,
                "instance did not become reachable before the deadline",
            ));
        }
    }

    /// Decide whether a create-rejection or verify-timeout should be
    /// retried against a comparable offer. Advances `candidate`/`excluded`
    /// and bumps `session.retry_count` when it does; callers still own
    /// persisting the session afterward. Returns `false` once retries are
    /// opted out, exhausted, or no comparable offer remains.
    async fn retry_against_comparable(
        &self,
        request: &ProvisionRequest,
        session: &mut Session,
        candidate: &mut Offer,
        excluded: &mut Vec<(String, String)>,
        max_retries: u32,
        metrics: &mut ProvisionerMetrics,
    ) -> Result<bool, FleetError> {
        if !request.auto_retry || session.retry_count >= max_retries {
            return Ok(false);
        }

        excluded.push((candidate.provider.clone(), candidate.id.clone()));
        let alternatives = self
            .inventory
            .find_comparable(candidate, request.comparable_scope, excluded)
            .await?;
        let Some(next) = alternatives.into_iter().next() else {
            return Ok(false);
        };

        warn!(session_id = %session.id, from = %candidate.id, to = %next.id, "retrying provision against a comparable offer");
        *candidate = next;
        session.retry_count += 1;
        metrics.auto_retries += 1;
        Ok(true)
    }

    /// Verified destruction: destroy, then poll until the provider confirms
    /// absence, bounded by `destroy_poll_max_attempts` with exponential
    /// backoff from `destroy_poll_base_delay`. Always leaves the session
    /// `Failed` — this is only reached once auto-retry has opted out or run
    /// out of candidates, so `Stopped` (a normal teardown) would be
    /// indistinguishable from this genuine failure.
    async fn destroy_and_fail(
        &self,
        session: &mut Session,
        reason: FleetErrorKind,
        metrics: &mut ProvisionerMetrics,
    ) -> Result<(), FleetError> {
        session.status = apply_event(session.status, SessionEvent::DestroyRequested)
            .map_err(|_| transition_error(&session.id))?;
        self.store.update(session.clone()).await?;

        let kind = match reason {
            FleetErrorKind::VerifyTimeout => FailureKind::SshTimeout,
            _ => FailureKind::Other,
        };
        self.failures
            .record_failure(&session.provider, &session.offer_id, &session.gpu_model, kind)
            .await;

        let verified = self.verified_destroy(session).await;
        if !verified {
            metrics.destroy_unverified += 1;
            session.last_error = Some("destroy could not be verified".to_string());
        }
        session.status = apply_event(session.status, SessionEvent::Failed)
            .unwrap_or(SessionStatus::Failed);
        self.store.update(session.clone()).await?;
        Ok(())
    }

    /// User-initiated destroy (signal_done, expiry/idle/hard-max sweeps).
    /// Unlike the create-path's destroy-on-failure, an unverified outcome
    /// here leaves the session `Stopping` rather than `Failed` — the
    /// reconciler keeps retrying it on later ticks. Returns the final
    /// session status and, on verified absence, the stop timestamp the
    /// cost tracker should use for the final accrual.
    pub async fn destroy_session(&self, session: &mut Session) -> Result<bool, FleetError> {
        if session.status.is_terminal() {
            return Ok(session.status == SessionStatus::Stopped);
        }
        if session.status != SessionStatus::Stopping {
            session.status = apply_event(session.status, SessionEvent::DestroyRequested)
                .map_err(|_| transition_error(&session.id))?;
            self.store.update(session.clone()).await?;
        }

        let verified = self.verified_destroy(session).await;
        if verified {
            session.status = SessionStatus::Stopped;
            session.stopped_at_ms = Some(now_ms());
        } else {
            warn!(session_id = %session.id, "destroy could not be verified, leaving session stopping for the reconciler");
        }
        self.store.update(session.clone()).await?;
        Ok(verified)
    }

    /// Issue destroy and poll for absence. Returns whether absence was
    /// verified within the configured attempt budget.
    pub async fn verified_destroy(&self, session: &Session) -> bool {
        let Some(instance_id) = &session.provider_instance_id else {
            return true;
        };
        let Some(adapter) = self.adapters.get(&session.provider) else {
            return false;
        };

        if adapter.destroy_instance(instance_id).await.is_err() {
            warn!(session_id = %session.id, "destroy call failed, still polling for absence");
        }

        for attempt in 0..self.config.destroy_poll_max_attempts {
            match adapter.get_instance_status(instance_id).await {
                Ok(InstanceStatus::NotFound) | Err(AdapterError::NotFound) => return true,
                _ => {
                    let delay = self.config.destroy_poll_base_delay * 2u32.pow(attempt.min(10));
                    sleep(delay).await;
                }
            }
        }
        false
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn transition_error(session_id: &str) -> FleetError {
    FleetError::new(
        FleetErrorKind::TerminalSession,
        session_id,
        "session status transition was rejected",
    )
}

fn translate_adapter_error(session_id: &str, error: AdapterError) -> FleetError {
    let kind = match error {
        AdapterError::InsufficientDisk { .. } => FleetErrorKind::InsufficientDisk,
        AdapterError::RateLimited => FleetErrorKind::ProviderRateLimit,
        AdapterError::AuthFailed => FleetErrorKind::ProviderAuth,
        AdapterError::NotFound => FleetErrorKind::NotFound,
        AdapterError::OfferUnavailable => FleetErrorKind::OfferUnavailable,
        AdapterError::StaleInventory => FleetErrorKind::StaleInventory,
        AdapterError::Io(_) => FleetErrorKind::AllProvidersFailed,
    };
    FleetError::new(kind, session_id, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;
    use crate::inventory::{CacheConfig, NoopPersistence};
    use crate::reachability::StubReachabilityVerifier;
    use crate::store::InMemorySessionStore;
    use fleet_core::session::{LaunchMode, StoragePolicy};

    fn offer(id: &str, price: f64) -> Offer {
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
            available: true,
        }
    }

    fn config() -> FleetConfig {
        FleetConfig::load().unwrap()
    }

    fn request(offer: Offer) -> ProvisionRequest {
        ProvisionRequest {
            consumer_id: "c1".to_string(),
            offer,
            session_config: SessionConfig {
                workload_tag: "train".to_string(),
                reservation_hours: 2,
                idle_threshold_minutes: 30,
                storage_policy: StoragePolicy::Destroy,
                hard_max_override: false,
                launch_mode: LaunchMode::Ssh,
            },
            docker_image: "pytorch/pytorch".to_string(),
            env: HashMap::new(),
            on_start_script: None,
            public_key: "ssh-ed25519 AAAA".to_string(),
            disk_gb: 40,
            exposed_ports: vec![22],
            auto_retry: true,
            max_retries: None,
            comparable_scope: ComparableScope::SameGpu,
        }
    }

    fn build_provisioner(
        adapter: Arc<MockAdapter>,
        reachable: bool,
    ) -> Provisioner {
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert("vastai".to_string(), adapter.clone());
        let failures = Arc::new(FailureTracker::new(Box::new(NoopPersistence)));
        let inventory = InventoryCache::new(
            adapters.clone(),
            failures.clone(),
            CacheConfig {
                ttl: Duration::from_secs(60),
                soft_expiry_ratio: 0.75,
                error_backoff: Duration::from_secs(300),
            },
        );
        Provisioner::new(
            adapters,
            Arc::new(InMemorySessionStore::new()),
            inventory,
            failures,
            Arc::new(StubReachabilityVerifier(reachable)),
            config(),
        )
    }

    #[tokio::test]
    async fn happy_path_reaches_running() {
        let adapter = Arc::new(MockAdapter::new("vastai", vec![offer("o1", 0.5)]));
        let provisioner = build_provisioner(adapter, true);
        let mut metrics = ProvisionerMetrics::default();
        let session = provisioner
            .provision(request(offer("o1", 0.5)), &mut metrics)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(metrics.attempts, 1);
    }

    #[tokio::test]
    async fn unreachable_instance_is_destroyed_and_session_fails() {
        let adapter = Arc::new(MockAdapter::new("vastai", vec![offer("o1", 0.5)]));
        let provisioner = build_provisioner(adapter.clone(), false);
        let mut metrics = ProvisionerMetrics::default();
        let result = provisioner.provision(request(offer("o1", 0.5)), &mut metrics).await;
        assert!(result.is_err());
        assert_eq!(metrics.verify_timeouts, 1);
        let all = adapter.list_all_instances().await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn destroy_session_verifies_absence_and_stops() {
        let adapter = Arc::new(MockAdapter::new("vastai", vec![offer("o1", 0.5)]));
        let provisioner = build_provisioner(adapter, true);
        let mut metrics = ProvisionerMetrics::default();
        let mut session = provisioner
            .provision(request(offer("o1", 0.5)), &mut metrics)
            .await
            .unwrap();

        let verified = provisioner.destroy_session(&mut session).await.unwrap();
        assert!(verified);
        assert_eq!(session.status, SessionStatus::Stopped);
        assert!(session.stopped_at_ms.is_some());
    }

    #[tokio::test]
    async fn without_auto_retry_a_stale_offer_fails_immediately() {
        let adapter = Arc::new(MockAdapter::new(
            "vastai",
            vec![offer("o1", 0.5), offer("o2", 0.55)],
        ));
        adapter.script_failure("o1", AdapterError::StaleInventory).await;
        let provisioner = build_provisioner(adapter, true);
        let mut metrics = ProvisionerMetrics::default();
        let mut req = request(offer("o1", 0.5));
        req.auto_retry = false;
        let result = provisioner.provision(req, &mut metrics).await;
        assert!(result.is_err());
        assert_eq!(metrics.auto_retries, 0);
    }

    #[tokio::test]
    async fn stale_offer_auto_retries_against_a_comparable_offer() {
        let adapter = Arc::new(MockAdapter::new(
            "vastai",
            vec![offer("o1", 0.5), offer("o2", 0.55)],
        ));
        adapter.script_failure("o1", AdapterError::StaleInventory).await;
        let provisioner = build_provisioner(adapter, true);
        let mut metrics = ProvisionerMetrics::default();
        let session = provisioner
            .provision(request(offer("o1", 0.5)), &mut metrics)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.offer_id, "o2");
        assert_eq!(metrics.auto_retries, 1);
    }
}
