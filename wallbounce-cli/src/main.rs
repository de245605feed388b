//! WallBounce CLI — one-shot consensus analysis from the command line.
//!
//! Runs a prompt through the engine and prints the consensus. With no
//! `PROVIDERS_ENABLED` in the environment the engine uses its offline
//! mock fleet, which makes the binary useful for smoke-testing configs
//! and demos without API keys.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wallbounce_core::{
    AnalysisRequest, BounceMode, EngineConfig, MetricsSurface, ProviderRegistry, TaskTier,
    WallBounceOrchestrator,
};

/// WallBounce: bounce a prompt off several LLM providers and report the
/// consensus.
#[derive(Parser, Debug)]
#[command(name = "wallbounce", version, about, long_about = None)]
struct Cli {
    /// The prompt to analyze
    prompt: String,

    /// Task tier: basic, premium, critical
    #[arg(short, long, default_value = "basic")]
    task_type: String,

    /// Dispatch mode: parallel, sequential
    #[arg(short, long, default_value = "parallel")]
    mode: String,

    /// Sequential chain depth (3-5)
    #[arg(short, long)]
    depth: Option<u8>,

    /// Minimum providers to consult
    #[arg(long)]
    min_providers: Option<usize>,

    /// Maximum providers to consult
    #[arg(long)]
    max_providers: Option<usize>,

    /// Confidence threshold below which the tier escalates
    #[arg(long)]
    threshold: Option<f64>,

    /// Emit the full consensus record as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "wallbounce=warn",
        1 => "wallbounce=info",
        _ => "wallbounce=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_target(false)
        .init();

    let config = EngineConfig::load().context("loading engine configuration")?;
    let metrics = Arc::new(MetricsSurface::new());
    let registry = Arc::new(
        ProviderRegistry::from_config(&config, Arc::clone(&metrics))
            .context("building provider registry")?,
    );
    let orchestrator = WallBounceOrchestrator::new(registry, config, metrics);

    let tier = TaskTier::parse(&cli.task_type)
        .with_context(|| format!("unknown task type: {}", cli.task_type))?;
    let mode = BounceMode::parse(&cli.mode)
        .with_context(|| format!("unknown mode: {}", cli.mode))?;

    let mut request = AnalysisRequest::new(&cli.prompt, tier).with_mode(mode);
    if let Some(depth) = cli.depth {
        request = request.with_depth(depth);
    }
    if let Some(min) = cli.min_providers {
        request = request.with_min_providers(min);
    }
    if let Some(max) = cli.max_providers {
        request = request.with_max_providers(max);
    }
    if let Some(threshold) = cli.threshold {
        request = request.with_confidence_threshold(threshold);
    }

    let consensus = orchestrator.analyze(request).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&consensus)?);
        return Ok(());
    }

    println!("{}", consensus.content);
    println!();
    println!(
        "confidence {:.2} | quality {:?} | verified {} | escalated {}",
        consensus.confidence,
        consensus.quality,
        consensus.wall_bounce_verified,
        consensus.tier_escalated,
    );
    println!(
        "providers: {}",
        consensus
            .providers_used
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    for vote in &consensus.all_votes {
        match &vote.error {
            None => println!(
                "  {} ({}): confidence {:.2}, agreement {:.2}, {}ms, ${:.4}",
                vote.provider_name,
                vote.model,
                vote.confidence,
                vote.agreement_score,
                vote.latency_ms,
                vote.cost_usd,
            ),
            Some(err) => println!("  {} failed: {err}", vote.provider_name),
        }
    }
    println!(
        "total: ${:.4} in {}ms",
        consensus.total_cost_usd, consensus.total_latency_ms
    );

    Ok(())
}
