//! Provider feature capabilities, gated the same way venue capabilities were:
//! an AND of what the provider actually supports and what the caller asked
//! for — never inferred from one side alone.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderCapability {
    IdleDetection,
    InstanceTags,
    SpotPricing,
}

/// What a concrete adapter reports it can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub idle_detection: bool,
    pub instance_tags: bool,
    pub spot_pricing: bool,
}

impl AdapterCapabilities {
    pub fn supports(&self, capability: ProviderCapability) -> bool {
        match capability {
            ProviderCapability::IdleDetection => self.idle_detection,
            ProviderCapability::InstanceTags => self.instance_tags,
            ProviderCapability::SpotPricing => self.spot_pricing,
        }
    }
}

/// What the caller has asked to use, independent of provider support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedCapabilities {
    pub idle_detection: bool,
    pub spot_pricing: bool,
}

/// The AND of provider support and caller request. A feature is only
/// actually usable when both sides agree.
pub fn evaluate_capability(
    adapter: AdapterCapabilities,
    requested: RequestedCapabilities,
    capability: ProviderCapability,
) -> bool {
    let requested_on = match capability {
        ProviderCapability::IdleDetection => requested.idle_detection,
        ProviderCapability::SpotPricing => requested.spot_pricing,
        ProviderCapability::InstanceTags => true, // always required, never caller-gated
    };
    requested_on && adapter.supports(capability)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_requires_both_sides() {
        let supports_idle = AdapterCapabilities {
            idle_detection: true,
            ..Default::default()
        };
        let wants_idle = RequestedCapabilities {
            idle_detection: true,
            ..Default::default()
        };
        assert!(evaluate_capability(
            supports_idle,
            wants_idle,
            ProviderCapability::IdleDetection
        ));

        let no_support = AdapterCapabilities::default();
        assert!(!evaluate_capability(
            no_support,
            wants_idle,
            ProviderCapability::IdleDetection
        ));

        let not_requested = RequestedCapabilities::default();
        assert!(!evaluate_capability(
            supports_idle,
            not_requested,
            ProviderCapability::IdleDetection
        ));
    }

    #[test]
    fn instance_tags_are_always_required() {
        let adapter = AdapterCapabilities {
            instance_tags: true,
            ..Default::default()
        };
        assert!(evaluate_capability(
            adapter,
            RequestedCapabilities::default(),
            ProviderCapability::InstanceTags
        ));
    }
}
