//! Bidirectional diff between provider truth and the session store: pure
//! set-membership classification, no I/O. The reconciler in `fleet_infra`
//! gathers both sides and calls straight into this.

use crate::session::SessionStatus;

/// One provider-side instance, as reported by `list_all_instances`.
#[derive(Debug, Clone)]
pub struct ProviderInstanceRef {
    pub provider_instance_id: String,
    /// The session id recovered from the instance's tag. Absence here would
    /// mean the instance isn't ours at all — callers must already have
    /// filtered by tag prefix before reaching this module.
    pub tagged_session_id: String,
}

/// The subset of session fields the reconciler needs, for one provider.
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub session_id: String,
    pub status: SessionStatus,
    pub provider_instance_id: Option<String>,
    /// When the session entered `Provisioning`, used by the
    /// provisioning-but-missing grace period.
    pub provisioning_since_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Provider instance ids with no matching non-terminal local session —
    /// destroy them.
    pub orphan_instance_ids: Vec<String>,
    /// Session ids whose bound instance is no longer on the provider —
    /// mark them stopped with an "instance not found" error.
    pub ghost_session_ids: Vec<String>,
    /// Session ids stuck in `Provisioning` with no bound instance past the
    /// grace period — mark them failed.
    pub provisioning_missing_session_ids: Vec<String>,
}

/// Sessions in these statuses are the ones a provider-side instance should
/// still map back to; anything else reconciling against an instance is an
/// orphan regardless of whether its session id happens to appear in the
/// store at all (a long-terminal session is just as orphan-producing as an
/// unknown one).
fn tracks_provider_instance(status: SessionStatus) -> bool {
    matches!(
        status,
        SessionStatus::Provisioning | SessionStatus::Running | SessionStatus::Stopping
    )
}

pub fn reconcile(
    provider_instances: &[ProviderInstanceRef],
    sessions: &[TrackedSession],
    now_ms: u64,
    provisioning_grace_ms: u64,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let non_terminal_ids: std::collections::HashSet<&str> = sessions
        .iter()
        .filter(|s| tracks_provider_instance(s.status))
        .map(|s| s.session_id.as_str())
        .collect();

    for instance in provider_instances {
        if !non_terminal_ids.contains(instance.tagged_session_id.as_str()) {
            report
                .orphan_instance_ids
                .push(instance.provider_instance_id.clone());
        }
    }

    let provider_instance_ids: std::collections::HashSet<&str> = provider_instances
        .iter()
        .map(|i| i.provider_instance_id.as_str())
        .collect();

    for session in sessions {
        match session.status {
            SessionStatus::Running | SessionStatus::Stopping => {
                let bound = session.provider_instance_id.as_deref();
                let still_present = bound.is_some_and(|id| provider_instance_ids.contains(id));
                if !still_present {
                    report.ghost_session_ids.push(session.session_id.clone());
                }
            }
            SessionStatus::Provisioning if session.provider_instance_id.is_none() => {
                let age_ms = now_ms.saturating_sub(session.provisioning_since_ms);
                if age_ms > provisioning_grace_ms {
                    report
                        .provisioning_missing_session_ids
                        .push(session.session_id.clone());
                }
            }
            _ => {}
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, session_id: &str) -> ProviderInstanceRef {
        ProviderInstanceRef {
            provider_instance_id: id.to_string(),
            tagged_session_id: session_id.to_string(),
        }
    }

    fn session(id: &str, status: SessionStatus, provider_instance_id: Option<&str>) -> TrackedSession {
        TrackedSession {
            session_id: id.to_string(),
            status,
            provider_instance_id: provider_instance_id.map(str::to_string),
            provisioning_since_ms: 0,
        }
    }

    #[test]
    fn untagged_instance_becomes_an_orphan() {
        let instances = vec![instance("inst-1", "sess-unknown")];
        let sessions = vec![];
        let report = reconcile(&instances, &sessions, 0, 0);
        assert_eq!(report.orphan_instance_ids, vec!["inst-1".to_string()]);
    }

    #[test]
    fn instance_bound_to_terminal_session_is_still_an_orphan() {
        let instances = vec![instance("inst-1", "sess-1")];
        let sessions = vec![session("sess-1", SessionStatus::Stopped, Some("inst-1"))];
        let report = reconcile(&instances, &sessions, 0, 0);
        assert_eq!(report.orphan_instance_ids, vec!["inst-1".to_string()]);
    }

    #[test]
    fn missing_instance_for_running_session_is_a_ghost() {
        let instances = vec![];
        let sessions = vec![session("sess-1", SessionStatus::Running, Some("inst-1"))];
        let report = reconcile(&instances, &sessions, 0, 0);
        assert_eq!(report.ghost_session_ids, vec!["sess-1".to_string()]);
    }

    #[test]
    fn provisioning_without_bind_past_grace_is_flagged() {
        let sessions = vec![TrackedSession {
            session_id: "sess-1".to_string(),
            status: SessionStatus::Provisioning,
            provider_instance_id: None,
            provisioning_since_ms: 0,
        }];
        let report = reconcile(&[], &sessions, 10 * 60 * 1000, 5 * 60 * 1000);
        assert_eq!(
            report.provisioning_missing_session_ids,
            vec!["sess-1".to_string()]
        );
    }

    #[test]
    fn provisioning_within_grace_is_not_flagged() {
        let sessions = vec![TrackedSession {
            session_id: "sess-1".to_string(),
            status: SessionStatus::Provisioning,
            provider_instance_id: None,
            provisioning_since_ms: 0,
        }];
        let report = reconcile(&[], &sessions, 60 * 1000, 5 * 60 * 1000);
        assert!(report.provisioning_missing_session_ids.is_empty());
    }

    #[test]
    fn matched_instance_and_session_produce_no_findings() {
        let instances = vec![instance("inst-1", "sess-1")];
        let sessions = vec![session("sess-1", SessionStatus::Running, Some("inst-1"))];
        let report = reconcile(&instances, &sessions, 0, 0);
        assert_eq!(report, ReconcileReport::default());
    }
}
