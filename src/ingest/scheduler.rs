// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::baseline::{compute_activity, ActivityTier, ActivityWindow};
use crate::ingest::types::Publisher;
use crate::ingest::Ingestor;
use crate::region::Region;
use crate::trending::trending_terms;

const TRENDING_LIMIT: usize = 10;

#[derive(Clone, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
    pub insufficient_coverage: Vec<Region>,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Scheduler ticks completed.");
        describe_gauge!(
            "region_activity_multiplier",
            "Observed/expected post volume over the last six hours, by region."
        );
        describe_gauge!("region_activity_count", "Posts in the last six hours, by region.");
    });
}

fn log_window(w: &ActivityWindow) {
    match w.tier {
        ActivityTier::Critical | ActivityTier::Elevated => tracing::warn!(
            target: "ingest",
            region = w.region.as_str(),
            tier = w.tier.as_str(),
            count = w.count,
            expected = w.expected,
            percent_change = w.percent_change,
            "regional activity above baseline"
        ),
        ActivityTier::Normal => tracing::info!(
            target: "ingest",
            region = w.region.as_str(),
            tier = w.tier.as_str(),
            count = w.count,
            expected = w.expected,
            percent_change = w.percent_change,
        ),
    }
}

/// Run one batch per tick: fetch, tier each region, sweep the caches.
pub fn spawn_scheduler(
    ingestor: Arc<Ingestor>,
    publishers: Vec<Arc<Publisher>>,
    cfg: IngestSchedulerCfg,
) -> JoinHandle<()> {
    ensure_metrics_described();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        loop {
            ticker.tick().await;

            let outcome = ingestor.fetch_batch(&publishers).await;
            let now = Utc::now();

            for w in compute_activity(&outcome.items, &publishers, now, &cfg.insufficient_coverage) {
                gauge!("region_activity_multiplier", "region" => w.region.as_str())
                    .set(w.multiplier);
                gauge!("region_activity_count", "region" => w.region.as_str())
                    .set(w.count as f64);
                log_window(&w);
            }

            for t in trending_terms(ingestor.classifier(), &outcome.items, TRENDING_LIMIT) {
                tracing::debug!(target: "ingest", term = %t.term, count = t.count, regions = ?t.regions);
            }

            let swept = ingestor.caches().sweep(now);
            counter!("ingest_runs_total").increment(1);
            tracing::debug!(target: "ingest", swept, "resilience caches swept");
        }
    })
}
