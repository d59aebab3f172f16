//! Session status DAG and the pure transition function that enforces it.

/// Lifecycle status of a rented session.
///
/// `Stopped` and `Failed` are terminal: no event may move a session out of
/// either state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Pending,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }

    /// Whether the session currently occupies the single "active" slot for
    /// its (consumer, offer) pair.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Provisioning | SessionStatus::Running
        )
    }
}

/// Events that move a session through the status DAG. Each event is raised
/// by exactly one component (noted per variant) — the transition function
/// itself does not know or care who raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Provisioner: provider accepted the create call, instance id bound.
    Bound,
    /// Provisioner: reachability verified within the deadline.
    VerifiedReachable,
    /// Provisioner or lifecycle manager: a destroy has been requested.
    DestroyRequested,
    /// Provisioner: destroy was confirmed absent by the provider.
    DestroyVerified,
    /// Any component: the session cannot proceed and must fail outright.
    Failed,
}

/// Rejection reason when an event does not apply to the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The session is already terminal; no event may be applied.
    AlreadyTerminal(SessionStatus),
    /// The event does not apply to the current status (e.g. `Bound` on a
    /// session that is not `Pending`).
    NotApplicable {
        from: SessionStatus,
        event: SessionEvent,
    },
}

/// Apply `event` to `from`, returning the resulting status or why the event
/// was rejected. `Failed` fast-forwards from any non-terminal status.
pub fn apply_event(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, TransitionError> {
    if from.is_terminal() {
        return Err(TransitionError::AlreadyTerminal(from));
    }

    if event == SessionEvent::Failed {
        return Ok(SessionStatus::Failed);
    }

    let to = match (from, event) {
        (SessionStatus::Pending, SessionEvent::Bound) => SessionStatus::Provisioning,
        (SessionStatus::Provisioning, SessionEvent::VerifiedReachable) => SessionStatus::Running,
        (
            SessionStatus::Pending | SessionStatus::Provisioning | SessionStatus::Running,
            SessionEvent::DestroyRequested,
        ) => SessionStatus::Stopping,
        (SessionStatus::Stopping, SessionEvent::DestroyVerified) => SessionStatus::Stopped,
        _ => {
            return Err(TransitionError::NotApplicable { from, event });
        }
    };

    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_dag() {
        let s = SessionStatus::Pending;
        let s = apply_event(s, SessionEvent::Bound).unwrap();
        assert_eq!(s, SessionStatus::Provisioning);
        let s = apply_event(s, SessionEvent::VerifiedReachable).unwrap();
        assert_eq!(s, SessionStatus::Running);
        let s = apply_event(s, SessionEvent::DestroyRequested).unwrap();
        assert_eq!(s, SessionStatus::Stopping);
        let s = apply_event(s, SessionEvent::DestroyVerified).unwrap();
        assert_eq!(s, SessionStatus::Stopped);
    }

    #[test]
    fn failed_fast_forwards_from_any_non_terminal_state() {
        for from in [
            SessionStatus::Pending,
            SessionStatus::Provisioning,
            SessionStatus::Running,
            SessionStatus::Stopping,
        ] {
            assert_eq!(
                apply_event(from, SessionEvent::Failed).unwrap(),
                SessionStatus::Failed
            );
        }
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for terminal in [SessionStatus::Stopped, SessionStatus::Failed] {
            for event in [
                SessionEvent::Bound,
                SessionEvent::VerifiedReachable,
                SessionEvent::DestroyRequested,
                SessionEvent::DestroyVerified,
            ] {
                assert_eq!(
                    apply_event(terminal, event),
                    Err(TransitionError::AlreadyTerminal(terminal))
                );
            }
        }
    }

    #[test]
    fn out_of_order_event_is_rejected_not_silently_applied() {
        assert_eq!(
            apply_event(SessionStatus::Pending, SessionEvent::VerifiedReachable),
            Err(TransitionError::NotApplicable {
                from: SessionStatus::Pending,
                event: SessionEvent::VerifiedReachable,
            })
        );
    }

    #[test]
    fn stopping_is_reached_from_every_non_terminal_active_state() {
        for from in [
            SessionStatus::Pending,
            SessionStatus::Provisioning,
            SessionStatus::Running,
        ] {
            assert_eq!(
                apply_event(from, SessionEvent::DestroyRequested).unwrap(),
                SessionStatus::Stopping
            );
        }
    }
}
