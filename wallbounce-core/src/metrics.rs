//! Metrics surface — counters, histograms, and gauges for observability.
//!
//! One [`MetricsSurface`] instance is created at start-up and handed to the
//! components that populate it (adapters, approval manager, execution
//! service, orchestrator) as a write-only capability. Consumers read it
//! through [`MetricsSurface::render`], which emits Prometheus text
//! exposition with a `wallbounce_` prefix.

use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Label set for per-vote counters.
type VoteKey = (String, String, String); // provider, vendor, tier

/// A fixed-bucket histogram with an atomic sum.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    /// One count per bound, plus a trailing +Inf bucket.
    counts: Vec<AtomicU64>,
    count: AtomicU64,
    /// f64 bits, updated with a CAS loop.
    sum_bits: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &[f64]) -> Self {
        let counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds: bounds.to_vec(),
            counts,
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    /// Cumulative bucket counts paired with their upper bounds, +Inf last.
    fn cumulative(&self) -> Vec<(String, u64)> {
        let mut total = 0u64;
        let mut out = Vec::with_capacity(self.counts.len());
        for (i, counter) in self.counts.iter().enumerate() {
            total += counter.load(Ordering::Relaxed);
            let le = match self.bounds.get(i) {
                Some(b) => format_float(*b),
                None => "+Inf".to_string(),
            };
            out.push((le, total));
        }
        out
    }
}

const LATENCY_BOUNDS_MS: &[f64] = &[
    25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0,
];
const CONFIDENCE_BOUNDS: &[f64] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95];
const COST_BOUNDS_USD: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Shared observability surface for the whole engine.
#[derive(Debug)]
pub struct MetricsSurface {
    started: Instant,

    requests_total: DashMap<String, AtomicU64>, // tier
    votes_total: DashMap<VoteKey, AtomicU64>,
    errors_total: DashMap<(String, String), AtomicU64>, // provider, kind
    approvals_total: DashMap<String, AtomicU64>,        // state
    tokens_total: DashMap<(String, String), AtomicU64>, // provider, direction
    cancelled_total: AtomicU64,

    provider_latency_ms: DashMap<String, Histogram>,
    request_latency_ms: Histogram,
    consensus_confidence: Histogram,
    request_cost_usd: DashMap<String, Histogram>, // tier

    active_requests: AtomicI64,
    pending_approvals: AtomicI64,
}

impl MetricsSurface {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests_total: DashMap::new(),
            votes_total: DashMap::new(),
            errors_total: DashMap::new(),
            approvals_total: DashMap::new(),
            tokens_total: DashMap::new(),
            cancelled_total: AtomicU64::new(0),
            provider_latency_ms: DashMap::new(),
            request_latency_ms: Histogram::new(LATENCY_BOUNDS_MS),
            consensus_confidence: Histogram::new(CONFIDENCE_BOUNDS),
            request_cost_usd: DashMap::new(),
            active_requests: AtomicI64::new(0),
            pending_approvals: AtomicI64::new(0),
        }
    }

    // --- Counters ---

    pub fn record_request(&self, tier: &str) {
        self.requests_total
            .entry(tier.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vote(&self, provider: &str, vendor: &str, tier: &str) {
        self.votes_total
            .entry((provider.to_string(), vendor.to_string(), tier.to_string()))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, provider: &str, kind: &str) {
        self.errors_total
            .entry((provider.to_string(), kind.to_string()))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_approval_transition(&self, state: &str) {
        self.approvals_total
            .entry(state.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, provider: &str, input: u64, output: u64) {
        for (direction, count) in [("input", input), ("output", output)] {
            self.tokens_total
                .entry((provider.to_string(), direction.to_string()))
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_cancelled(&self) {
        self.cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    // --- Histograms ---

    pub fn observe_provider_latency(&self, provider: &str, latency_ms: u64) {
        self.provider_latency_ms
            .entry(provider.to_string())
            .or_insert_with(|| Histogram::new(LATENCY_BOUNDS_MS))
            .observe(latency_ms as f64);
    }

    pub fn observe_request_latency(&self, latency_ms: u64) {
        self.request_latency_ms.observe(latency_ms as f64);
    }

    pub fn observe_confidence(&self, confidence: f64) {
        self.consensus_confidence.observe(confidence);
    }

    pub fn observe_cost(&self, tier: &str, cost_usd: f64) {
        self.request_cost_usd
            .entry(tier.to_string())
            .or_insert_with(|| Histogram::new(COST_BOUNDS_USD))
            .observe(cost_usd);
    }

    // --- Gauges ---

    pub fn inc_active_requests(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_requests(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_requests(&self) -> i64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn inc_pending_approvals(&self) {
        self.pending_approvals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_pending_approvals(&self) {
        self.pending_approvals.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn pending_approvals(&self) -> i64 {
        self.pending_approvals.load(Ordering::Relaxed)
    }

    // --- Read side ---

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total
            .iter()
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    pub fn votes_total(&self) -> u64 {
        self.votes_total
            .iter()
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Sum of errors with the given kind, across providers.
    pub fn errors_by_kind(&self, kind: &str) -> u64 {
        self.errors_total
            .iter()
            .filter(|e| e.key().1 == kind)
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    pub fn approvals_by_state(&self, state: &str) -> u64 {
        self.approvals_total
            .get(state)
            .map(|e| e.value().load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn tokens_for(&self, provider: &str, direction: &str) -> u64 {
        self.tokens_total
            .get(&(provider.to_string(), direction.to_string()))
            .map(|e| e.value().load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn cancelled_total(&self) -> u64 {
        self.cancelled_total.load(Ordering::Relaxed)
    }

    /// Render the whole surface in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(4096);

        out.push_str("# TYPE wallbounce_requests_total counter\n");
        for entry in sorted_by_key(&self.requests_total) {
            let _ = writeln!(
                out,
                "wallbounce_requests_total{{tier=\"{}\"}} {}",
                entry.0,
                entry.1
            );
        }

        out.push_str("# TYPE wallbounce_votes_total counter\n");
        let mut votes: Vec<(VoteKey, u64)> = self
            .votes_total
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        votes.sort();
        for ((provider, vendor, tier), count) in votes {
            let _ = writeln!(
                out,
                "wallbounce_votes_total{{provider=\"{provider}\",vendor=\"{vendor}\",tier=\"{tier}\"}} {count}"
            );
        }

        out.push_str("# TYPE wallbounce_errors_total counter\n");
        let mut errors: Vec<((String, String), u64)> = self
            .errors_total
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        errors.sort();
        for ((provider, kind), count) in errors {
            let _ = writeln!(
                out,
                "wallbounce_errors_total{{provider=\"{provider}\",kind=\"{kind}\"}} {count}"
            );
        }

        out.push_str("# TYPE wallbounce_approvals_total counter\n");
        for (state, count) in sorted_by_key(&self.approvals_total) {
            let _ = writeln!(
                out,
                "wallbounce_approvals_total{{state=\"{state}\"}} {count}"
            );
        }

        out.push_str("# TYPE wallbounce_tokens_total counter\n");
        let mut tokens: Vec<((String, String), u64)> = self
            .tokens_total
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        tokens.sort();
        for ((provider, direction), count) in tokens {
            let _ = writeln!(
                out,
                "wallbounce_tokens_total{{provider=\"{provider}\",direction=\"{direction}\"}} {count}"
            );
        }

        out.push_str("# TYPE wallbounce_cancelled_total counter\n");
        let _ = writeln!(
            out,
            "wallbounce_cancelled_total {}",
            self.cancelled_total()
        );

        out.push_str("# TYPE wallbounce_provider_latency_ms histogram\n");
        let mut providers: Vec<String> = self
            .provider_latency_ms
            .iter()
            .map(|e| e.key().clone())
            .collect();
        providers.sort();
        for provider in providers {
            if let Some(hist) = self.provider_latency_ms.get(&provider) {
                render_histogram(
                    &mut out,
                    "wallbounce_provider_latency_ms",
                    &format!("provider=\"{provider}\""),
                    &hist,
                );
            }
        }

        out.push_str("# TYPE wallbounce_request_latency_ms histogram\n");
        render_histogram(&mut out, "wallbounce_request_latency_ms", "", &self.request_latency_ms);

        out.push_str("# TYPE wallbounce_consensus_confidence histogram\n");
        render_histogram(
            &mut out,
            "wallbounce_consensus_confidence",
            "",
            &self.consensus_confidence,
        );

        out.push_str("# TYPE wallbounce_request_cost_usd histogram\n");
        let mut tiers: Vec<String> = self
            .request_cost_usd
            .iter()
            .map(|e| e.key().clone())
            .collect();
        tiers.sort();
        for tier in tiers {
            if let Some(hist) = self.request_cost_usd.get(&tier) {
                render_histogram(
                    &mut out,
                    "wallbounce_request_cost_usd",
                    &format!("tier=\"{tier}\""),
                    &hist,
                );
            }
        }

        out.push_str("# TYPE wallbounce_active_requests gauge\n");
        let _ = writeln!(out, "wallbounce_active_requests {}", self.active_requests());
        out.push_str("# TYPE wallbounce_pending_approvals gauge\n");
        let _ = writeln!(
            out,
            "wallbounce_pending_approvals {}",
            self.pending_approvals()
        );

        out
    }
}

impl Default for MetricsSurface {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_key(map: &DashMap<String, AtomicU64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = map
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect();
    entries.sort();
    entries
}

fn render_histogram(out: &mut String, name: &str, labels: &str, hist: &Histogram) {
    let sep = if labels.is_empty() { "" } else { "," };
    for (le, count) in hist.cumulative() {
        let _ = writeln!(out, "{name}_bucket{{{labels}{sep}le=\"{le}\"}} {count}");
    }
    if labels.is_empty() {
        let _ = writeln!(out, "{name}_sum {}", format_float(hist.sum()));
        let _ = writeln!(out, "{name}_count {}", hist.count());
    } else {
        let _ = writeln!(out, "{name}_sum{{{labels}}} {}", format_float(hist.sum()));
        let _ = writeln!(out, "{name}_count{{{labels}}} {}", hist.count());
    }
}

/// Trim trailing zeros so bucket bounds read `0.5`, not `0.500000`.
fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let mut s = format!("{value}");
        if s.len() > 12 {
            s = format!("{value:.6}");
        }
        s
    }
}
