//! region-pulse — Binary Entrypoint
//! Loads configuration, starts the ingest scheduler and serves `/health` and
//! `/metrics` for operators.

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use region_pulse::classify::RegionClassifier;
use region_pulse::ingest::config::AppConfig;
use region_pulse::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use region_pulse::ingest::Ingestor;
use region_pulse::metrics::Metrics;
use region_pulse::resilience::ResilienceCaches;

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("region_pulse=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading region-pulse config")?;

    let classifier = match &cfg.regions_path {
        Some(p) => RegionClassifier::from_path(p)?,
        None => RegionClassifier::builtin()?,
    };

    let metrics = Metrics::init(cfg.publishers.len())?;
    let caches = Arc::new(ResilienceCaches::new());
    let ingestor = Arc::new(Ingestor::from_config(&cfg, Arc::new(classifier), caches));

    let publishers = cfg.publishers.iter().cloned().map(Arc::new).collect();
    let scheduler = spawn_scheduler(
        ingestor,
        publishers,
        IngestSchedulerCfg {
            interval_secs: cfg.interval_secs,
            insufficient_coverage: cfg.insufficient_coverage.clone(),
        },
    );

    let listener = tokio::net::TcpListener::bind(&cfg.metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {}", cfg.metrics_addr))?;
    tracing::info!(
        addr = %cfg.metrics_addr,
        publishers = cfg.publishers.len(),
        interval_secs = cfg.interval_secs,
        "region-pulse started"
    );

    tokio::select! {
        res = axum::serve(listener, metrics.router()).into_future() => res.context("metrics server")?,
        res = scheduler => res.context("scheduler task")?,
    }
    Ok(())
}
