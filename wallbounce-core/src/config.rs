//! Engine configuration.
//!
//! Uses `figment` for layered configuration: compiled defaults, then
//! environment variables. The environment names match the deployment
//! contract exactly (`PROVIDERS_ENABLED`, `APPROVAL_TTL_SECONDS`,
//! `DEFAULT_DEADLINE_MS`, `MAX_CONCURRENT_REQUESTS`, `METRICS_BIND`);
//! per-tier overrides arrive as JSON objects in
//! `TASK_TIER_DEFAULTS_{BASIC,PREMIUM,CRITICAL}`.

use crate::error::ConfigError;
use crate::types::TaskTier;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-tier knobs the orchestrator consults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierDefaults {
    pub min_providers: usize,
    pub confidence_threshold: f64,
    pub deadline_ms: u64,
}

impl TierDefaults {
    fn for_tier(tier: TaskTier) -> Self {
        Self {
            min_providers: tier.default_min_providers(),
            confidence_threshold: tier.default_confidence_threshold(),
            deadline_ms: tier.global_deadline().as_millis() as u64,
        }
    }
}

/// Tier defaults table, one entry per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    pub basic: TierDefaults,
    pub premium: TierDefaults,
    pub critical: TierDefaults,
}

impl TierTable {
    pub fn get(&self, tier: TaskTier) -> TierDefaults {
        match tier {
            TaskTier::Basic => self.basic,
            TaskTier::Premium => self.premium,
            TaskTier::Critical => self.critical,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            basic: TierDefaults::for_tier(TaskTier::Basic),
            premium: TierDefaults::for_tier(TaskTier::Premium),
            critical: TierDefaults::for_tier(TaskTier::Critical),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// CSV of enabled provider names, resolved against the built-in
    /// catalogue. Empty means "all mock providers" (offline mode).
    pub providers_enabled: String,
    pub tiers: TierTable,
    /// Pending approvals older than this expire. Absolute from creation.
    pub approval_ttl_seconds: u64,
    /// Fallback per-call deadline when a descriptor does not set one.
    pub default_deadline_ms: u64,
    /// Admission-control bound on concurrent `analyze` calls.
    pub max_concurrent_requests: usize,
    /// How long an excess caller queues before `Overloaded`.
    pub admission_wait_ms: u64,
    /// Byte cap on tool outputs concatenated into the prompt context.
    pub tool_context_byte_cap: usize,
    /// Bind address for the HTTP boundary (analyze + metrics endpoints).
    pub metrics_bind: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers_enabled: String::new(),
            tiers: TierTable::default(),
            approval_ttl_seconds: 1800,
            default_deadline_ms: 30_000,
            max_concurrent_requests: 64,
            admission_wait_ms: 250,
            tool_context_byte_cap: 16 * 1024,
            metrics_bind: "127.0.0.1:9464".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration: defaults, then environment.
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Env::prefixed("").only(&[
                "providers_enabled",
                "approval_ttl_seconds",
                "default_deadline_ms",
                "max_concurrent_requests",
                "admission_wait_ms",
                "tool_context_byte_cap",
                "metrics_bind",
            ]));

        let mut config: EngineConfig = figment.extract().map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
        config.apply_tier_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Merge `TASK_TIER_DEFAULTS_*` JSON overrides, if present.
    fn apply_tier_env(&mut self) -> Result<(), ConfigError> {
        for (var, tier) in [
            ("TASK_TIER_DEFAULTS_BASIC", TaskTier::Basic),
            ("TASK_TIER_DEFAULTS_PREMIUM", TaskTier::Premium),
            ("TASK_TIER_DEFAULTS_CRITICAL", TaskTier::Critical),
        ] {
            let Ok(raw) = std::env::var(var) else {
                continue;
            };
            let defaults: TierDefaults =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    message: format!("{var}: {e}"),
                })?;
            match tier {
                TaskTier::Basic => self.tiers.basic = defaults,
                TaskTier::Premium => self.tiers.premium = defaults,
                TaskTier::Critical => self.tiers.critical = defaults,
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid {
                message: "max_concurrent_requests must be at least 1".into(),
            });
        }
        for (name, defaults) in [
            ("basic", self.tiers.basic),
            ("premium", self.tiers.premium),
            ("critical", self.tiers.critical),
        ] {
            if !(0.0..=1.0).contains(&defaults.confidence_threshold) {
                return Err(ConfigError::Invalid {
                    message: format!("{name}: confidence_threshold outside [0..1]"),
                });
            }
            if defaults.min_providers == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("{name}: min_providers must be at least 1"),
                });
            }
        }
        Ok(())
    }

    /// Enabled provider names, parsed from the CSV.
    pub fn enabled_providers(&self) -> Vec<String> {
        self.providers_enabled
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn approval_ttl(&self) -> Duration {
        Duration::from_secs(self.approval_ttl_seconds)
    }

    pub fn admission_wait(&self) -> Duration {
        Duration::from_millis(self.admission_wait_ms)
    }

    /// Per-call deadline for providers whose descriptor leaves the
    /// timeout unset.
    pub fn default_call_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    /// Global deadline for a tier, from the tier table.
    pub fn tier_deadline(&self, tier: TaskTier) -> Duration {
        Duration::from_millis(self.tiers.get(tier).deadline_ms)
    }
}
