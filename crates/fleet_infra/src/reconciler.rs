//! Background reconciliation: wires the pure classification logic in
//! `fleet_core::reconcile` to live adapters and the session store, then
//! acts on what it finds. Holds no session-level lock — every write is a
//! compare-and-swap, so a concurrent provisioner write simply wins and the
//! reconciler re-evaluates on its next tick.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use fleet_core::error::FleetError;
use fleet_core::reconcile::{reconcile, ProviderInstanceRef, ReconcileReport, TrackedSession};
use fleet_core::session::SessionStatus;

use crate::adapter::ProviderAdapter;
use crate::config::FleetConfig;
use crate::cost_tracker::CostTracker;
use crate::store::SessionStore;

pub struct Reconciler {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    store: Arc<dyn SessionStore>,
    cost_tracker: Arc<CostTracker>,
    config: FleetConfig,
}

impl Reconciler {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        store: Arc<dyn SessionStore>,
        cost_tracker: Arc<CostTracker>,
        config: FleetConfig,
    ) -> Self {
        Self { adapters, store, cost_tracker, config }
    }

    /// One reconciliation pass across every configured provider.
    pub async fn tick_at(&self, now_ms: u64) -> Result<ReconcileReport, FleetError> {
        let all_sessions = self.store.list_all().await?;
        let mut combined = ReconcileReport::default();

        for (provider_name, adapter) in &self.adapters {
            let instances: Vec<ProviderInstanceRef> = match adapter.list_all_instances().await {
                Ok(instances) => instances,
                Err(err) => {
                    warn!(provider = %provider_name, error = %err, "reconciler could not list instances, skipping this provider this tick");
                    continue;
                }
            };

            let tracked: Vec<TrackedSession> = all_sessions
                .iter()
                .filter(|s| &s.provider == provider_name)
                .map(|s| TrackedSession {
                    session_id: s.id.clone(),
                    status: s.status,
                    provider_instance_id: s.provider_instance_id.clone(),
                    provisioning_since_ms: s.created_at_ms,
                })
                .collect();

            let report = reconcile(
                &instances,
                &tracked,
                now_ms,
                self.config.reconciler_provisioning_grace.as_millis() as u64,
            );

            for instance_id in &report.orphan_instance_ids {
                info!(provider = %provider_name, instance_id = %instance_id, "destroying orphaned instance");
                let _ = adapter.destroy_instance(instance_id).await;
            }

            for session_id in &report.ghost_session_ids {
                if let Some(mut session) = self.store.get(session_id).await? {
                    session.status = SessionStatus::Stopped;
                    session.stopped_at_ms = Some(now_ms);
                    session.last_error = Some("instance not found".to_string());
                    self.store.update(session.clone()).await?;
                    warn!(session_id = %session_id, "marked ghost session stopped");
                    if let Err(err) = self.cost_tracker.record_final(&session, now_ms).await {
                        warn!(session_id = %session_id, error = %err, "failed to bill ghost session on repair");
                    }
                }
            }

            for session_id in &report.provisioning_missing_session_ids {
                if let Some(mut session) = self.store.get(session_id).await? {
                    session.status = SessionStatus::Failed;
                    session.last_error = Some("provisioning never bound an instance".to_string());
                    self.store.update(session).await?;
                    warn!(session_id = %session_id, "marked stuck-provisioning session failed");
                }
            }

            combined.orphan_instance_ids.extend(report.orphan_instance_ids);
            combined.ghost_session_ids.extend(report.ghost_session_ids);
            combined
                .provisioning_missing_session_ids
                .extend(report.provisioning_missing_session_ids);
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;
    use crate::store::{InMemoryConsumerStore, InMemoryCostLedger, InMemorySessionStore};
    use fleet_core::session::{LaunchMode, Session, SessionConfig, StoragePolicy};

    fn cost_tracker(store: Arc<dyn SessionStore>) -> Arc<CostTracker> {
        Arc::new(CostTracker::new(
            store,
            Arc::new(InMemoryConsumerStore::new()),
            Arc::new(InMemoryCostLedger::new()),
        ))
    }

    fn session(id: &str, provider: &str, status: SessionStatus, instance_id: Option<&str>) -> Session {
        Session {
            id: id.to_string(),
            consumer_id: "c1".to_string(),
            offer_id: "o1".to_string(),
            provider: provider.to_string(),
            gpu_model: "A100".to_string(),
            provider_instance_id: instance_id.map(|s| s.to_string()),
            config: SessionConfig {
                workload_tag: "train".to_string(),
                reservation_hours: 2,
                idle_threshold_minutes: 30,
                storage_policy: StoragePolicy::Destroy,
                hard_max_override: false,
                launch_mode: LaunchMode::Ssh,
            },
            reachability: None,
            status,
            created_at_ms: 0,
            expires_at_ms: 7_200_000,
            stopped_at_ms: None,
            last_error: None,
            price_per_hour: 0.5,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn ghost_session_is_marked_stopped() {
        let adapter = Arc::new(MockAdapter::new("vastai", vec![]));
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert("vastai".to_string(), adapter);
        let store = Arc::new(InMemorySessionStore::new());
        store
            .insert(session("s1", "vastai", SessionStatus::Running, Some("inst-1")))
            .await
            .unwrap();

        let tracker = cost_tracker(store.clone());
        let reconciler = Reconciler::new(adapters, store.clone(), tracker, FleetConfig::load().unwrap());
        let report = reconciler.tick_at(0).await.unwrap();
        assert_eq!(report.ghost_session_ids, vec!["s1".to_string()]);
        let updated = store.get("s1").await.unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn orphan_instance_is_destroyed() {
        let adapter = Arc::new(MockAdapter::new(
            "vastai",
            vec![fleet_core::offer::Offer {
                id: "o1".to_string(),
                provider: "vastai".to_string(),
                gpu_model: "A100".to_string(),
                gpu_count: 1,
                vram_gb: 80,
                price_per_hour: 0.5,
                location: "us-east".to_string(),
                reliability_score: 0.9,
                availability_confidence: 1.0,
                fetched_at_ms: 0,
                available: true,
            }],
        ));
        let created = adapter
            .create_instance(&crate::adapter::CreateInstanceRequest {
                offer_id: "o1".to_string(),
                session_id_tag: "unknown-session".to_string(),
                docker_image: "img".to_string(),
                env: HashMap::new(),
                on_start_script: None,
                public_key: "k".to_string(),
                disk_gb: 10,
                exposed_ports: vec![],
            })
            .await
            .unwrap();

        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert("vastai".to_string(), adapter.clone());
        let store = Arc::new(InMemorySessionStore::new());

        let tracker = cost_tracker(store.clone());
        let reconciler = Reconciler::new(adapters, store, tracker, FleetConfig::load().unwrap());
        let report = reconciler.tick_at(0).await.unwrap();
        assert_eq!(report.orphan_instance_ids, vec![created.provider_instance_id.clone()]);
        let all = adapter.list_all_instances().await.unwrap();
        assert!(all.is_empty());
    }
}
