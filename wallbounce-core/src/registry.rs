//! Provider registry — enumerates adapters and enforces routing rules.
//!
//! The registry is immutable after construction. Its hard invariant is
//! absolute routing: each `(vendor, model)` pair may be registered through
//! exactly one transport. A second registration for the same pair aborts
//! construction with a [`ConfigError`], and the invariant is rechecked on
//! every lookup.
//!
//! Each entry carries a circuit breaker: providers that keep failing are
//! skipped during selection while enough healthy alternatives remain, and
//! are probed again after the recovery timeout.

use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError};
use crate::metrics::MetricsSurface;
use crate::provider::{
    MockBackend, ProviderAdapter, ProviderBackend, ProviderDescriptor, Transport,
};
use crate::transport::{CliTransport, McpTransport, SdkTransport};
use crate::types::TaskTier;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// State of a provider's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Too many consecutive failures; calls are skipped.
    Open { since: Instant },
    /// Recovery probe: one call is permitted.
    HalfOpen,
}

/// Trips after consecutive failures, recovers via a timed half-open probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: usize,
    failure_threshold: usize,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn is_call_permitted(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.recovery_timeout {
                    debug!("circuit breaker transitioning to half-open");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        if self.failure_count >= self.failure_threshold {
            warn!(
                failures = self.failure_count,
                threshold = self.failure_threshold,
                "circuit breaker opening"
            );
            self.state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    adapter: Arc<ProviderAdapter>,
    breaker: Mutex<CircuitBreaker>,
}

/// Builder that enforces the routing invariant while providers register.
pub struct ProviderRegistryBuilder {
    entries: Vec<RegistryEntry>,
    routing: HashMap<(String, String), Transport>,
    metrics: Arc<MetricsSurface>,
    failure_threshold: usize,
    recovery_timeout: Duration,
}

impl ProviderRegistryBuilder {
    pub fn new(metrics: Arc<MetricsSurface>) -> Self {
        Self {
            entries: Vec::new(),
            routing: HashMap::new(),
            metrics,
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_breaker_policy(mut self, failure_threshold: usize, recovery_timeout: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.recovery_timeout = recovery_timeout;
        self
    }

    /// Register one provider. Fails when its `(vendor, model)` pair is
    /// already routed, whatever the transport.
    pub fn register(
        mut self,
        descriptor: ProviderDescriptor,
        backend: Arc<dyn ProviderBackend>,
    ) -> Result<Self, ConfigError> {
        if self
            .entries
            .iter()
            .any(|e| e.adapter.name() == descriptor.name)
        {
            return Err(ConfigError::DuplicateProvider {
                name: descriptor.name,
            });
        }

        let pair = (descriptor.vendor.clone(), descriptor.model.clone());
        if let Some(existing) = self.routing.get(&pair) {
            return Err(ConfigError::TransportConflict {
                vendor: pair.0,
                model: pair.1,
                existing: existing.to_string(),
                attempted: descriptor.transport.to_string(),
            });
        }
        self.routing.insert(pair, descriptor.transport);

        let breaker = CircuitBreaker::new(self.failure_threshold, self.recovery_timeout);
        self.entries.push(RegistryEntry {
            adapter: Arc::new(ProviderAdapter::new(
                descriptor,
                backend,
                Arc::clone(&self.metrics),
            )),
            breaker: Mutex::new(breaker),
        });
        Ok(self)
    }

    pub fn build(self) -> ProviderRegistry {
        info!(providers = self.entries.len(), "provider registry built");
        ProviderRegistry {
            entries: self.entries,
        }
    }
}

/// Immutable set of registered providers.
pub struct ProviderRegistry {
    entries: Vec<RegistryEntry>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn builder(metrics: Arc<MetricsSurface>) -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new(metrics)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.adapter.name().to_string())
            .collect()
    }

    /// Recheck the absolute-routing invariant. The registry is immutable,
    /// so this can only fail if construction was bypassed.
    fn verify_routing(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<(&str, &str), Transport> = HashMap::new();
        for entry in &self.entries {
            let d = entry.adapter.descriptor();
            let pair = (d.vendor.as_str(), d.model.as_str());
            if let Some(existing) = seen.insert(pair, d.transport) {
                return Err(ConfigError::TransportConflict {
                    vendor: d.vendor.clone(),
                    model: d.model.clone(),
                    existing: existing.to_string(),
                    attempted: d.transport.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Ordered provider selection for one request.
    ///
    /// Candidates support the tier; ranking is tier-dependent; vendors are
    /// deduplicated unless `min_count` exceeds the distinct vendor count.
    /// Providers with open circuits are skipped while enough healthy
    /// candidates remain.
    pub fn providers_for(
        &self,
        tier: TaskTier,
        min_count: usize,
    ) -> Result<Vec<Arc<ProviderAdapter>>, EngineError> {
        self.verify_routing().map_err(EngineError::Config)?;

        let candidates: Vec<&RegistryEntry> = self
            .entries
            .iter()
            .filter(|e| e.adapter.descriptor().supports(tier))
            .collect();

        // Circuit skip, but never below the requested quorum.
        let healthy: Vec<&RegistryEntry> = candidates
            .iter()
            .copied()
            .filter(|e| e.breaker.lock().expect("breaker poisoned").is_call_permitted())
            .collect();
        let pool = if healthy.len() >= min_count {
            healthy
        } else {
            candidates
        };

        let mut ranked: Vec<Arc<ProviderAdapter>> =
            pool.iter().map(|e| Arc::clone(&e.adapter)).collect();
        rank_for_tier(&mut ranked, tier);

        // First pass keeps one provider per vendor; duplicates only fill
        // in when the quorum exceeds the vendor count.
        let mut seen_vendors: HashSet<String> = HashSet::new();
        let mut selected: Vec<Arc<ProviderAdapter>> = Vec::new();
        let mut leftovers: Vec<Arc<ProviderAdapter>> = Vec::new();
        for adapter in ranked {
            if seen_vendors.insert(adapter.descriptor().vendor.clone()) {
                selected.push(adapter);
            } else {
                leftovers.push(adapter);
            }
        }
        let mut leftovers = leftovers.into_iter();
        while selected.len() < min_count {
            match leftovers.next() {
                Some(adapter) => selected.push(adapter),
                None => break,
            }
        }

        debug!(
            tier = %tier,
            min_count,
            selected = selected.len(),
            "providers selected"
        );
        Ok(selected)
    }

    /// Feed a vote outcome back into the provider's circuit breaker.
    pub fn record_outcome(&self, provider_name: &str, success: bool) {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.adapter.name() == provider_name)
        {
            let mut breaker = entry.breaker.lock().expect("breaker poisoned");
            if success {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }
    }

    /// Circuit state for one provider, for the health surface.
    pub fn circuit_state(&self, provider_name: &str) -> Option<CircuitState> {
        self.entries
            .iter()
            .find(|e| e.adapter.name() == provider_name)
            .map(|e| e.breaker.lock().expect("breaker poisoned").state())
    }

    /// Build a registry from configuration: each name in
    /// `PROVIDERS_ENABLED` resolves against the built-in catalogue. An
    /// empty list yields the offline mock fleet.
    pub fn from_config(
        config: &EngineConfig,
        metrics: Arc<MetricsSurface>,
    ) -> Result<Self, EngineError> {
        let enabled = config.enabled_providers();
        let mut builder = Self::builder(metrics);

        if enabled.is_empty() {
            for (descriptor, backend) in mock_fleet() {
                builder = builder.register(descriptor, backend).map_err(EngineError::Config)?;
            }
            return Ok(builder.build());
        }

        for name in enabled {
            let (descriptor, backend) =
                catalogue_entry(&name).ok_or(EngineError::Config(ConfigError::UnknownProvider {
                    name: name.clone(),
                }))??;
            builder = builder.register(descriptor, backend).map_err(EngineError::Config)?;
        }
        Ok(builder.build())
    }
}

// ---------------------------------------------------------------------------
// Built-in catalogue
// ---------------------------------------------------------------------------

fn descriptor(
    name: &str,
    vendor: &str,
    model: &str,
    transport: Transport,
    cost_in: f64,
    cost_out: f64,
    tiers: &[TaskTier],
    quality_rank: u8,
    timeout_ms: u64,
) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.to_string(),
        vendor: vendor.to_string(),
        model: model.to_string(),
        transport,
        cost_per_input_token: cost_in,
        cost_per_output_token: cost_out,
        supported_tiers: tiers.to_vec(),
        quality_rank,
        timeout_ms,
    }
}

type CatalogueEntry = (ProviderDescriptor, Arc<dyn ProviderBackend>);

/// Resolve one catalogue name into a descriptor plus its backend.
/// Outer `None` means the name is unknown; the inner result carries
/// backend construction failures (e.g. a missing API key).
fn catalogue_entry(name: &str) -> Option<Result<CatalogueEntry, EngineError>> {
    const ALL: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical];
    const UPPER: &[TaskTier] = &[TaskTier::Premium, TaskTier::Critical];
    const LOWER: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium];

    let entry = match name {
        "gpt5-sdk" => {
            let backend = match SdkTransport::new("https://api.openai.com/v1", "OPENAI_API_KEY", "gpt-5") {
                Ok(b) => Arc::new(b) as Arc<dyn ProviderBackend>,
                Err(e) => return Some(Err(EngineError::Config(e))),
            };
            (
                descriptor("gpt5-sdk", "openai", "gpt-5", Transport::SdkDirect, 1.25e-6, 1.0e-5, ALL, 9, 45_000),
                backend,
            )
        }
        "gpt5-mini-sdk" => {
            let backend = match SdkTransport::new("https://api.openai.com/v1", "OPENAI_API_KEY", "gpt-5-mini") {
                Ok(b) => Arc::new(b) as Arc<dyn ProviderBackend>,
                Err(e) => return Some(Err(EngineError::Config(e))),
            };
            (
                descriptor("gpt5-mini-sdk", "openai", "gpt-5-mini", Transport::SdkDirect, 2.5e-7, 2.0e-6, LOWER, 6, 30_000),
                backend,
            )
        }
        "claude-cli" => (
            descriptor("claude-cli", "anthropic", "claude-sonnet-4-5", Transport::Cli, 3.0e-6, 1.5e-5, ALL, 9, 60_000),
            Arc::new(CliTransport::new(
                "claude",
                ["-p", "--output-format", "json"],
            )) as Arc<dyn ProviderBackend>,
        ),
        "gemini-mcp" => (
            descriptor("gemini-mcp", "google", "gemini-2.5-pro", Transport::Mcp, 1.25e-6, 1.0e-5, UPPER, 8, 45_000),
            Arc::new(McpTransport::new(
                "http://127.0.0.1:8900/rpc",
                std::env::var("GEMINI_MCP_TOKEN").ok(),
            )) as Arc<dyn ProviderBackend>,
        ),
        "gemini-flash-mcp" => (
            descriptor("gemini-flash-mcp", "google", "gemini-2.5-flash", Transport::Mcp, 1.5e-7, 6.0e-7, LOWER, 5, 20_000),
            Arc::new(McpTransport::new(
                "http://127.0.0.1:8900/rpc",
                std::env::var("GEMINI_MCP_TOKEN").ok(),
            )) as Arc<dyn ProviderBackend>,
        ),
        _ => return None,
    };
    Some(Ok(entry))
}

/// Offline fleet used when no providers are configured: four mock
/// providers across four vendors, enough for every tier's quorum.
fn mock_fleet() -> Vec<CatalogueEntry> {
    const ALL: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical];
    const LOWER: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium];

    vec![
        (
            descriptor("mock-fast", "sim-a", "sim-small", Transport::Cli, 1.0e-7, 4.0e-7, LOWER, 4, 10_000),
            Arc::new(MockBackend::with_text(
                "Roll back the most recent deploy",
                0.84,
            )) as Arc<dyn ProviderBackend>,
        ),
        (
            descriptor("mock-balanced", "sim-b", "sim-medium", Transport::SdkDirect, 5.0e-7, 2.0e-6, ALL, 6, 15_000),
            Arc::new(MockBackend::with_text(
                "Correlate the alert with recent deploys and roll back the last change",
                0.86,
            )) as Arc<dyn ProviderBackend>,
        ),
        (
            descriptor("mock-thorough", "sim-c", "sim-large", Transport::Mcp, 2.0e-6, 8.0e-6, ALL, 9, 30_000),
            Arc::new(MockBackend::with_text(
                "Correlate the alert with recent deploys and roll back the last change",
                0.92,
            )) as Arc<dyn ProviderBackend>,
        ),
        (
            descriptor("mock-audit", "sim-d", "sim-large-audit", Transport::SdkDirect, 1.5e-6, 6.0e-6, ALL, 8, 30_000),
            Arc::new(MockBackend::with_text(
                "Correlate the alert with recent deploys and roll back the last change",
                0.85,
            )) as Arc<dyn ProviderBackend>,
        ),
    ]
}

/// Tier-dependent ranking.
///
/// - basic: cheapest first
/// - premium: balanced quality/cost score
/// - critical: highest quality first
fn rank_for_tier(adapters: &mut [Arc<ProviderAdapter>], tier: TaskTier) {
    match tier {
        TaskTier::Basic => adapters.sort_by(|a, b| {
            let (da, db) = (a.descriptor(), b.descriptor());
            da.blended_cost()
                .partial_cmp(&db.blended_cost())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| db.quality_rank.cmp(&da.quality_rank))
                .then_with(|| da.name.cmp(&db.name))
        }),
        TaskTier::Premium => {
            let max_cost = adapters
                .iter()
                .map(|a| a.descriptor().blended_cost())
                .fold(0.0_f64, f64::max)
                .max(f64::MIN_POSITIVE);
            let score = |d: &ProviderDescriptor| {
                0.5 * (f64::from(d.quality_rank) / 10.0)
                    + 0.5 * (1.0 - d.blended_cost() / max_cost)
            };
            adapters.sort_by(|a, b| {
                let (da, db) = (a.descriptor(), b.descriptor());
                score(db)
                    .partial_cmp(&score(da))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| da.name.cmp(&db.name))
            });
        }
        TaskTier::Critical => adapters.sort_by(|a, b| {
            let (da, db) = (a.descriptor(), b.descriptor());
            db.quality_rank
                .cmp(&da.quality_rank)
                .then_with(|| {
                    db.blended_cost()
                        .partial_cmp(&da.blended_cost())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| da.name.cmp(&db.name))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Arc<MetricsSurface> {
        Arc::new(MetricsSurface::new())
    }

    fn mock_descriptor(
        name: &str,
        vendor: &str,
        model: &str,
        transport: Transport,
        cost_out: f64,
        tiers: &[TaskTier],
        quality: u8,
    ) -> ProviderDescriptor {
        descriptor(name, vendor, model, transport, cost_out / 4.0, cost_out, tiers, quality, 5_000)
    }

    fn backend() -> Arc<dyn ProviderBackend> {
        Arc::new(MockBackend::with_text("answer", 0.8))
    }

    fn sample_registry() -> ProviderRegistry {
        const ALL: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical];
        ProviderRegistry::builder(metrics())
            .register(
                mock_descriptor("cheap", "vendor-a", "small", Transport::Cli, 1.0e-6, ALL, 3),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor("mid", "vendor-b", "medium", Transport::Mcp, 4.0e-6, ALL, 6),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor("best", "vendor-c", "large", Transport::SdkDirect, 1.0e-5, ALL, 9),
                backend(),
            )
            .unwrap()
            .build()
    }

    #[test]
    fn test_transport_conflict_aborts_construction() {
        const ALL: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical];
        let result = ProviderRegistry::builder(metrics())
            .register(
                mock_descriptor("via-cli", "vendor-v", "model-m", Transport::Cli, 1e-6, ALL, 5),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor("via-sdk", "vendor-v", "model-m", Transport::SdkDirect, 1e-6, ALL, 5),
                backend(),
            );
        let err = result.err().expect("conflicting registration must fail");
        match err {
            ConfigError::TransportConflict {
                vendor,
                model,
                existing,
                attempted,
            } => {
                assert_eq!(vendor, "vendor-v");
                assert_eq!(model, "model-m");
                assert_eq!(existing, "cli");
                assert_eq!(attempted, "sdk-direct");
            }
            other => panic!("expected TransportConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        const ALL: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical];
        let result = ProviderRegistry::builder(metrics())
            .register(
                mock_descriptor("same", "vendor-a", "m1", Transport::Cli, 1e-6, ALL, 5),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor("same", "vendor-b", "m2", Transport::Cli, 1e-6, ALL, 5),
                backend(),
            );
        assert!(matches!(result, Err(ConfigError::DuplicateProvider { .. })));
    }

    #[test]
    fn test_basic_tier_ranks_cheapest_first() {
        let registry = sample_registry();
        let selected = registry.providers_for(TaskTier::Basic, 3).unwrap();
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["cheap", "mid", "best"]);
    }

    #[test]
    fn test_critical_tier_ranks_quality_first() {
        let registry = sample_registry();
        let selected = registry.providers_for(TaskTier::Critical, 3).unwrap();
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["best", "mid", "cheap"]);
    }

    #[test]
    fn test_tier_filter_excludes_unsupported() {
        let registry = ProviderRegistry::builder(metrics())
            .register(
                mock_descriptor(
                    "basic-only",
                    "vendor-a",
                    "small",
                    Transport::Cli,
                    1e-6,
                    &[TaskTier::Basic],
                    3,
                ),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor(
                    "critical-capable",
                    "vendor-b",
                    "large",
                    Transport::Mcp,
                    1e-5,
                    &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical],
                    9,
                ),
                backend(),
            )
            .unwrap()
            .build();

        let selected = registry.providers_for(TaskTier::Critical, 2).unwrap();
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["critical-capable"]);
    }

    #[test]
    fn test_min_count_beyond_pool_returns_all() {
        let registry = sample_registry();
        let selected = registry.providers_for(TaskTier::Premium, 10).unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_vendor_dedup_until_min_count_requires_repeats() {
        const ALL: &[TaskTier] = &[TaskTier::Basic, TaskTier::Premium, TaskTier::Critical];
        let registry = ProviderRegistry::builder(metrics())
            .register(
                mock_descriptor("a-small", "vendor-a", "small", Transport::Cli, 1e-6, ALL, 3),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor("a-large", "vendor-a", "large", Transport::Mcp, 8e-6, ALL, 8),
                backend(),
            )
            .unwrap()
            .register(
                mock_descriptor("b-medium", "vendor-b", "medium", Transport::SdkDirect, 4e-6, ALL, 6),
                backend(),
            )
            .unwrap()
            .build();

        // Two vendors: a quorum of 2 stays vendor-unique.
        let selected = registry.providers_for(TaskTier::Basic, 2).unwrap();
        let vendors: Vec<&str> = selected
            .iter()
            .map(|a| a.descriptor().vendor.as_str())
            .collect();
        assert_eq!(vendors.len(), 2);
        assert_ne!(vendors[0], vendors[1]);

        // A quorum of 3 exceeds the vendor count, so repeats fill in.
        let selected = registry.providers_for(TaskTier::Basic, 3).unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_circuit_open_skips_provider_when_quorum_allows() {
        let registry = sample_registry();
        // Trip "cheap": breaker threshold is 3.
        for _ in 0..3 {
            registry.record_outcome("cheap", false);
        }
        assert!(matches!(
            registry.circuit_state("cheap"),
            Some(CircuitState::Open { .. })
        ));

        let selected = registry.providers_for(TaskTier::Basic, 2).unwrap();
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert!(!names.contains(&"cheap"));
        assert_eq!(names.len(), 2);

        // Quorum of 3 cannot be met without it, so it comes back.
        let selected = registry.providers_for(TaskTier::Basic, 3).unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_success_closes_circuit_again() {
        let registry = sample_registry();
        for _ in 0..3 {
            registry.record_outcome("cheap", false);
        }
        registry.record_outcome("cheap", true);
        assert_eq!(registry.circuit_state("cheap"), Some(CircuitState::Closed));
    }

    #[test]
    fn test_breaker_half_open_after_recovery_timeout() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.is_call_permitted());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_from_config_empty_builds_mock_fleet() {
        let config = EngineConfig::default();
        let registry = ProviderRegistry::from_config(&config, metrics()).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.names().contains(&"mock-thorough".to_string()));
    }

    #[test]
    fn test_from_config_unknown_name_fails() {
        let config = EngineConfig {
            providers_enabled: "definitely-not-a-provider".into(),
            ..Default::default()
        };
        let err = ProviderRegistry::from_config(&config, metrics()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::UnknownProvider { .. })
        ));
    }

    #[tokio::test]
    async fn test_selection_is_subset_of_registry() {
        let registry = sample_registry();
        let names: HashSet<String> = registry.names().into_iter().collect();
        for tier in [TaskTier::Basic, TaskTier::Premium, TaskTier::Critical] {
            for adapter in registry.providers_for(tier, 2).unwrap() {
                assert!(names.contains(adapter.name()));
            }
        }
    }
}
