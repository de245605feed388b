//! WallBounce server binary: config, registry, orchestrator, HTTP.

use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wallbounce_core::{EngineConfig, MetricsSurface, ProviderRegistry, WallBounceOrchestrator};
use wallbounce_server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "wallbounce=info".into()),
        )
        .init();

    // Only configuration faults may abort the process.
    let config = EngineConfig::load().context("loading engine configuration")?;
    let metrics = Arc::new(MetricsSurface::new());
    let registry = Arc::new(
        ProviderRegistry::from_config(&config, Arc::clone(&metrics))
            .context("building provider registry")?,
    );
    info!(providers = registry.len(), "registry initialised");

    let bind = config.metrics_bind.clone();
    let orchestrator =
        WallBounceOrchestrator::new(Arc::clone(&registry), config, Arc::clone(&metrics));
    let state = Arc::new(AppState {
        orchestrator,
        metrics,
        registry,
        started: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "wallbounce server listening");
    axum::serve(listener, router(state))
        .await
        .context("server exited")?;
    Ok(())
}
