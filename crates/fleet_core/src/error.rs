//! The error-kind taxonomy shared by every component. Variants are
//! behavior-carrying: callers match on the kind, never on a rendered
//! message, and upper layers propagate a kind unchanged rather than
//! remapping it.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FleetErrorKind {
    NotFound,
    DuplicateSession,
    OfferUnavailable,
    StaleInventory,
    InsufficientDisk,
    VerifyTimeout,
    DestroyUnverified,
    TerminalSession,
    HardMaxExceeded,
    ProviderRateLimit,
    ProviderAuth,
    AllProvidersFailed,
}

impl FleetErrorKind {
    /// Whether a caller is advised to retry this failure as-is (without
    /// necessarily changing the offer/request).
    pub fn retry_advised(&self) -> bool {
        matches!(
            self,
            FleetErrorKind::ProviderRateLimit
                | FleetErrorKind::OfferUnavailable
                | FleetErrorKind::StaleInventory
        )
    }
}

impl fmt::Display for FleetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FleetErrorKind::NotFound => "not-found",
            FleetErrorKind::DuplicateSession => "duplicate-session",
            FleetErrorKind::OfferUnavailable => "offer-unavailable",
            FleetErrorKind::StaleInventory => "stale-inventory",
            FleetErrorKind::InsufficientDisk => "insufficient-disk",
            FleetErrorKind::VerifyTimeout => "verify-timeout",
            FleetErrorKind::DestroyUnverified => "destroy-unverified",
            FleetErrorKind::TerminalSession => "terminal-session",
            FleetErrorKind::HardMaxExceeded => "hard-max-exceeded",
            FleetErrorKind::ProviderRateLimit => "provider-rate-limit",
            FleetErrorKind::ProviderAuth => "provider-auth",
            FleetErrorKind::AllProvidersFailed => "all-providers-failed",
        };
        f.write_str(s)
    }
}

/// A user-visible failure: the typed kind, the offending entity id, and
/// whatever detail helps a human act on it.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetError {
    pub kind: FleetErrorKind,
    pub entity_id: String,
    pub detail: String,
}

impl FleetError {
    pub fn new(kind: FleetErrorKind, entity_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            detail: detail.into(),
        }
    }

    pub fn retry_advised(&self) -> bool {
        self.kind.retry_advised()
    }
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.entity_id, self.detail)
    }
}

impl std::error::Error for FleetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_stale_inventory_advise_retry() {
        assert!(FleetErrorKind::ProviderRateLimit.retry_advised());
        assert!(FleetErrorKind::StaleInventory.retry_advised());
        assert!(!FleetErrorKind::ProviderAuth.retry_advised());
        assert!(!FleetErrorKind::NotFound.retry_advised());
    }
}
