//! Fail-closed configuration defaults for the control loop's timers and
//! thresholds.
//!
//! If a parameter is absent from the environment and has a default below,
//! the default applies. If no default exists for a parameter that is
//! nonetheless required, startup must fail rather than guess.

use std::fmt;
use std::time::Duration;

/// Every tunable this crate reads from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigParam {
    InventoryCacheTtlS,
    InventoryCacheSoftExpiryRatioPct,
    InventoryCacheErrorBackoffS,
    ReachabilityTimeoutS,
    ReachabilityHeavyImageTimeoutS,
    ProvisionerMaxRetries,
    DestroyPollMaxAttempts,
    DestroyPollBaseDelayMs,
    ExpirySweepIntervalS,
    ExpirySweepConcurrency,
    IdleSweepIntervalS,
    ReconcilerIntervalS,
    ReconcilerProvisioningGraceS,
    CostAccrualIntervalS,
    ProviderCallTimeoutS,
    RateLimiterBaseDelayMs,
    RateLimiterMaxDelayS,
}

/// All variants, for exhaustive-iteration tests (stable Rust has no
/// `variant_count`).
pub const ALL_PARAMS: &[ConfigParam] = &[
    ConfigParam::InventoryCacheTtlS,
    ConfigParam::InventoryCacheSoftExpiryRatioPct,
    ConfigParam::InventoryCacheErrorBackoffS,
    ConfigParam::ReachabilityTimeoutS,
    ConfigParam::ReachabilityHeavyImageTimeoutS,
    ConfigParam::ProvisionerMaxRetries,
    ConfigParam::DestroyPollMaxAttempts,
    ConfigParam::DestroyPollBaseDelayMs,
    ConfigParam::ExpirySweepIntervalS,
    ConfigParam::ExpirySweepConcurrency,
    ConfigParam::IdleSweepIntervalS,
    ConfigParam::ReconcilerIntervalS,
    ConfigParam::ReconcilerProvisioningGraceS,
    ConfigParam::CostAccrualIntervalS,
    ConfigParam::ProviderCallTimeoutS,
    ConfigParam::RateLimiterBaseDelayMs,
    ConfigParam::RateLimiterMaxDelayS,
];

pub const EXPECTED_PARAM_COUNT: usize = 17;

/// Error when a required parameter is missing and has no default, or is
/// present but fails validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingConfigError {
    pub param_name: &'static str,
    pub reason: String,
}

impl fmt::Display for MissingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config fail-closed: '{}' is invalid and has no usable default ({})",
            self.param_name, self.reason
        )
    }
}

impl std::error::Error for MissingConfigError {}

/// The default value for a parameter, or `None` if it has no safe default
/// and must be supplied explicitly.
pub fn default_value(param: ConfigParam) -> Option<f64> {
    match param {
        ConfigParam::InventoryCacheTtlS => Some(60.0),
        ConfigParam::InventoryCacheSoftExpiryRatioPct => Some(75.0),
        ConfigParam::InventoryCacheErrorBackoffS => Some(300.0),
        ConfigParam::ReachabilityTimeoutS => Some(600.0),
        ConfigParam::ReachabilityHeavyImageTimeoutS => Some(900.0),
        ConfigParam::ProvisionerMaxRetries => Some(5.0),
        ConfigParam::DestroyPollMaxAttempts => Some(10.0),
        ConfigParam::DestroyPollBaseDelayMs => Some(500.0),
        ConfigParam::ExpirySweepIntervalS => Some(30.0),
        ConfigParam::ExpirySweepConcurrency => Some(5.0),
        ConfigParam::IdleSweepIntervalS => Some(60.0),
        ConfigParam::ReconcilerIntervalS => Some(300.0),
        ConfigParam::ReconcilerProvisioningGraceS => Some(300.0),
        ConfigParam::CostAccrualIntervalS => Some(3600.0),
        ConfigParam::ProviderCallTimeoutS => Some(30.0),
        ConfigParam::RateLimiterBaseDelayMs => Some(500.0),
        ConfigParam::RateLimiterMaxDelayS => Some(60.0),
    }
}

/// The snake_case environment variable name for a parameter.
pub fn param_name(param: ConfigParam) -> &'static str {
    match param {
        ConfigParam::InventoryCacheTtlS => "FLEET_INVENTORY_CACHE_TTL_S",
        ConfigParam::InventoryCacheSoftExpiryRatioPct => "FLEET_INVENTORY_CACHE_SOFT_EXPIRY_RATIO_PCT",
        ConfigParam::InventoryCacheErrorBackoffS => "FLEET_INVENTORY_CACHE_ERROR_BACKOFF_S",
        ConfigParam::ReachabilityTimeoutS => "FLEET_REACHABILITY_TIMEOUT_S",
        ConfigParam::ReachabilityHeavyImageTimeoutS => "FLEET_REACHABILITY_HEAVY_IMAGE_TIMEOUT_S",
        ConfigParam::ProvisionerMaxRetries => "FLEET_PROVISIONER_MAX_RETRIES",
        ConfigParam::DestroyPollMaxAttempts => "FLEET_DESTROY_POLL_MAX_ATTEMPTS",
        ConfigParam::DestroyPollBaseDelayMs => "FLEET_DESTROY_POLL_BASE_DELAY_MS",
        ConfigParam::ExpirySweepIntervalS => "FLEET_EXPIRY_SWEEP_INTERVAL_S",
        ConfigParam::ExpirySweepConcurrency => "FLEET_EXPIRY_SWEEP_CONCURRENCY",
        ConfigParam::IdleSweepIntervalS => "FLEET_IDLE_SWEEP_INTERVAL_S",
        ConfigParam::ReconcilerIntervalS => "FLEET_RECONCILER_INTERVAL_S",
        ConfigParam::ReconcilerProvisioningGraceS => "FLEET_RECONCILER_PROVISIONING_GRACE_S",
        ConfigParam::CostAccrualIntervalS => "FLEET_COST_ACCRUAL_INTERVAL_S",
        ConfigParam::ProviderCallTimeoutS => "FLEET_PROVIDER_CALL_TIMEOUT_S",
        ConfigParam::RateLimiterBaseDelayMs => "FLEET_RATE_LIMITER_BASE_DELAY_MS",
        ConfigParam::RateLimiterMaxDelayS => "FLEET_RATE_LIMITER_MAX_DELAY_S",
    }
}

fn resolve(param: ConfigParam) -> Result<f64, MissingConfigError> {
    let name = param_name(param);
    match std::env::var(name) {
        Ok(raw) => raw.parse::<f64>().map_err(|e| MissingConfigError {
            param_name: name,
            reason: format!("could not parse '{raw}': {e}"),
        }),
        Err(_) => default_value(param).ok_or_else(|| MissingConfigError {
            param_name: name,
            reason: "not set and no default exists".to_string(),
        }),
    }
}

/// Assembled, typed configuration for one running instance of the control
/// loop. Built once at startup and handed to every component — no component
/// reads the environment directly.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub inventory_cache_ttl: Duration,
    pub inventory_cache_soft_expiry_ratio: f64,
    pub inventory_cache_error_backoff: Duration,
    pub reachability_timeout: Duration,
    pub reachability_heavy_image_timeout: Duration,
    pub provisioner_max_retries: u32,
    pub destroy_poll_max_attempts: u32,
    pub destroy_poll_base_delay: Duration,
    pub expiry_sweep_interval: Duration,
    pub expiry_sweep_concurrency: usize,
    pub idle_sweep_interval: Duration,
    pub reconciler_interval: Duration,
    pub reconciler_provisioning_grace: Duration,
    pub cost_accrual_interval: Duration,
    pub provider_call_timeout: Duration,
    pub rate_limiter_base_delay: Duration,
    pub rate_limiter_max_delay: Duration,
}

impl FleetConfig {
    /// Load from the environment, falling back to documented defaults.
    /// Fails closed on an unparsable value or on retry caps above the hard
    /// ceiling this system enforces regardless of configuration (5).
    pub fn load() -> Result<Self, MissingConfigError> {
        let max_retries = resolve(ConfigParam::ProvisionerMaxRetries)? as u32;
        if max_retries > 5 {
            return Err(MissingConfigError {
                param_name: param_name(ConfigParam::ProvisionerMaxRetries),
                reason: "auto-retry is capped at 5 regardless of configuration".to_string(),
            });
        }

        let soft_expiry_ratio_pct = resolve(ConfigParam::InventoryCacheSoftExpiryRatioPct)?;
        if !(0.0..=100.0).contains(&soft_expiry_ratio_pct) {
            return Err(MissingConfigError {
                param_name: param_name(ConfigParam::InventoryCacheSoftExpiryRatioPct),
                reason: "must be a percentage between 0 and 100".to_string(),
            });
        }

        Ok(Self {
            inventory_cache_ttl: secs(resolve(ConfigParam::InventoryCacheTtlS)?),
            inventory_cache_soft_expiry_ratio: soft_expiry_ratio_pct / 100.0,
            inventory_cache_error_backoff: secs(resolve(ConfigParam::InventoryCacheErrorBackoffS)?),
            reachability_timeout: secs(resolve(ConfigParam::ReachabilityTimeoutS)?),
            reachability_heavy_image_timeout: secs(resolve(
                ConfigParam::ReachabilityHeavyImageTimeoutS,
            )?),
            provisioner_max_retries: max_retries,
            destroy_poll_max_attempts: resolve(ConfigParam::DestroyPollMaxAttempts)? as u32,
            destroy_poll_base_delay: millis(resolve(ConfigParam::DestroyPollBaseDelayMs)?),
            expiry_sweep_interval: secs(resolve(ConfigParam::ExpirySweepIntervalS)?),
            expiry_sweep_concurrency: resolve(ConfigParam::ExpirySweepConcurrency)? as usize,
            idle_sweep_interval: secs(resolve(ConfigParam::IdleSweepIntervalS)?),
            reconciler_interval: secs(resolve(ConfigParam::ReconcilerIntervalS)?),
            reconciler_provisioning_grace: secs(resolve(
                ConfigParam::ReconcilerProvisioningGraceS,
            )?),
            cost_accrual_interval: secs(resolve(ConfigParam::CostAccrualIntervalS)?),
            provider_call_timeout: secs(resolve(ConfigParam::ProviderCallTimeoutS)?),
            rate_limiter_base_delay: millis(resolve(ConfigParam::RateLimiterBaseDelayMs)?),
            rate_limiter_max_delay: secs(resolve(ConfigParam::RateLimiterMaxDelayS)?),
        })
    }
}

fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v.max(0.0))
}

fn millis(v: f64) -> Duration {
    Duration::from_millis(v.max(0.0) as u64)
}
