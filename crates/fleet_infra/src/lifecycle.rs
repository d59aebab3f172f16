//! Expiry, idle, and hard-max sweeps, plus the two caller-facing
//! operations (`extend`, `signal_done`) that do not belong to the
//! provisioner. This is the sole authority for a non-failure destroy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use fleet_core::error::{FleetError, FleetErrorKind};
use fleet_core::session::{validate_extension, Session, SessionStatus};

use crate::adapter::ProviderAdapter;
use crate::config::FleetConfig;
use crate::provisioner::Provisioner;
use crate::store::SessionStore;

pub const HARD_MAX_HOURS_MS: u64 = 12 * 3_600_000;

/// The idle-seconds sample a node last reported, supplied by the
/// out-of-scope on-node agent heartbeat. Pluggable so sweeps are testable
/// without a real heartbeat feed.
#[async_trait]
pub trait IdleSampleSource: Send + Sync {
    async fn idle_seconds(&self, session_id: &str) -> Option<u64>;
}

#[derive(Debug, Default)]
pub struct NoIdleSamples;

#[async_trait]
impl IdleSampleSource for NoIdleSamples {
    async fn idle_seconds(&self, _session_id: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub expired: u32,
    pub idle_terminated: u32,
    pub hard_max_terminated: u32,
}

pub struct LifecycleManager {
    store: Arc<dyn SessionStore>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    provisioner: Arc<Provisioner>,
    idle_samples: Arc<dyn IdleSampleSource>,
    config: FleetConfig,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        provisioner: Arc<Provisioner>,
        idle_samples: Arc<dyn IdleSampleSource>,
        config: FleetConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            provisioner,
            idle_samples,
            config,
        }
    }

    /// Owner-application graceful completion signal. Delegates to the
    /// provisioner's verified-destroy protocol.
    pub async fn signal_done(&self, session_id: &str) -> Result<(), FleetError> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| FleetError::new(FleetErrorKind::NotFound, session_id, "session not found"))?;
        if !matches!(
            session.status,
            SessionStatus::Pending | SessionStatus::Provisioning | SessionStatus::Running
        ) {
            return Err(FleetError::new(
                FleetErrorKind::TerminalSession,
                session_id,
                "session is not in a destroyable state",
            ));
        }
        self.destroy(&mut session).await
    }

    /// Extend `expires_at_ms` by `additional_hours`, compare-and-swap style
    /// so concurrent extends never lose an update.
    pub async fn extend(&self, session_id: &str, additional_hours: u32) -> Result<Session, FleetError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| FleetError::new(FleetErrorKind::NotFound, session_id, "session not found"))?;
        if session.status.is_terminal() || session.status == SessionStatus::Stopping {
            return Err(FleetError::new(
                FleetErrorKind::TerminalSession,
                session_id,
                "cannot extend a terminal or stopping session",
            ));
        }

        let new_expires_at = validate_extension(
            session.created_at_ms,
            session.expires_at_ms,
            additional_hours,
            session.config.hard_max_override,
        )
        .map_err(|_| {
            FleetError::new(
                FleetErrorKind::HardMaxExceeded,
                session_id,
                "extension would exceed the hard maximum reservation length",
            )
        })?;

        // Guard against a destroy racing this extend: a no-op CAS still
        // fails if the status moved since we read it above, which is a
        // cheaper concurrency check than retrying the whole read-modify-write.
        self.store
            .compare_and_swap_status(session_id, session.status, session.status)
            .await?;

        let mut updated = session;
        updated.expires_at_ms = new_expires_at;
        self.store.update(updated.clone()).await?;
        Ok(updated)
    }

    /// Every `expiry_sweep_interval`: destroy non-terminal sessions whose
    /// `expires_at_ms` has passed, bounded by `expiry_sweep_concurrency`.
    pub async fn run_expiry_sweep_at(&self, now_ms: u64, report: &mut SweepReport) -> Result<(), FleetError> {
        let candidates: Vec<Session> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.expires_at_ms <= now_ms)
            .collect();

        for chunk in candidates.chunks(self.config.expiry_sweep_concurrency.max(1)) {
            for session in chunk {
                let mut session = session.clone();
                info!(session_id = %session.id, "expiry sweep destroying session");
                if let Ok(true) = self.destroy(&mut session).await {
                    report.expired += 1;
                }
            }
        }
        Ok(())
    }

    /// Every `idle_sweep_interval`: destroy running sessions past their
    /// idle threshold. A zero threshold opts a session out entirely.
    pub async fn run_idle_sweep(&self, report: &mut SweepReport) -> Result<(), FleetError> {
        let running: Vec<Session> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Running && s.config.idle_threshold_minutes > 0)
            .collect();

        for mut session in running {
            let threshold_s = u64::from(session.config.idle_threshold_minutes) * 60;
            if let Some(idle_s) = self.idle_samples.idle_seconds(&session.id).await {
                if idle_s >= threshold_s {
                    info!(session_id = %session.id, idle_s, "idle sweep destroying session");
                    if let Ok(true) = self.destroy(&mut session).await {
                        report.idle_terminated += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Independent safety net: any running session older than 12h without
    /// an override is destroyed regardless of `expires_at_ms`.
    pub async fn run_hard_max_sweep_at(&self, now_ms: u64, report: &mut SweepReport) -> Result<(), FleetError> {
        let candidates: Vec<Session> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|s| {
                s.status == SessionStatus::Running
                    && !s.config.hard_max_override
                    && now_ms.saturating_sub(s.created_at_ms) > HARD_MAX_HOURS_MS
            })
            .collect();

        for mut session in candidates {
            warn!(session_id = %session.id, "hard-max sweep destroying session");
            if let Ok(true) = self.destroy(&mut session).await {
                report.hard_max_terminated += 1;
            }
        }
        Ok(())
    }

    /// Returns whether the destroy was verified absent by the provider.
    /// An `Ok(false)` means the session was left `Stopping` for the
    /// reconciler to retry — sweep callers must not count that as done.
    async fn destroy(&self, session: &mut Session) -> Result<bool, FleetError> {
        self.provisioner.destroy_session(session).await
    }
}
