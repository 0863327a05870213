// src/ingest/mod.rs
pub mod config;
pub mod error;
pub mod http;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::classify::RegionClassifier;
use crate::ingest::config::AppConfig;
use crate::ingest::error::{FailureKind, FetchError, FetchResult};
use crate::ingest::providers::{
    chat::{ChatChannelAdapter, RpcGatewayConnector},
    federated::FederatedTimelineAdapter,
    social::SocialGraphAdapter,
    syndication::SyndicationAdapter,
    video::VideoFeedAdapter,
};
use crate::ingest::types::{NormalizedItem, Protocol, Publisher, RawItem, SourceProvider};
use crate::region::RegionAssignment;
use crate::resilience::ResilienceCaches;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Items parsed from providers.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_counter!(
            "ingest_skipped_total",
            "Publishers skipped due to resilience cache entries."
        );
        describe_counter!("ingest_dedup_total", "Items removed by id deduplication.");
        describe_histogram!("ingest_fetch_ms", "Per-publisher fetch time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the orchestrator last completed a batch."
        );
    });
}

/* ----------------------------
Text helpers shared by adapters
---------------------------- */

static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// HTML fragment → plain text: strip markup, decode entities, normalize
/// quotes, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    // 1) Line-ish tags become spaces so words don't fuse
    let out = RE_BR.replace_all(s, " ");

    // 2) Strip tags
    let out = RE_TAGS.replace_all(&out, "");

    // 3) Decode numeric, hex and named entities
    let mut out = html_escape::decode_html_entities(&out).to_string();

    // 4) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    // 5) Collapse whitespace
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// First `max` chars of `text`, with an ellipsis when cut.
pub fn truncate_title(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out = out.trim_end().to_string();
    out.push('…');
    out
}

/// Content-addressed id: first 16 hex chars of SHA-256(`namespace:key`).
pub fn content_id(namespace: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Clamp a parsed timestamp against `now`.
///
/// - missing/unparseable → now, with a diagnostic
/// - future by < 24h → now (zone-less feeds read as UTC often run ahead)
/// - future by ≥ 24h → now, with a diagnostic
pub fn clamp_timestamp(
    parsed: Option<DateTime<Utc>>,
    raw: Option<&str>,
    now: DateTime<Utc>,
    diagnostics: &mut Vec<String>,
) -> DateTime<Utc> {
    match parsed {
        None => {
            diagnostics.push(format!(
                "unparseable timestamp {:?}, clamped to now",
                raw.unwrap_or("")
            ));
            now
        }
        Some(ts) if ts > now => {
            if ts - now >= ChronoDuration::hours(24) {
                diagnostics.push(format!(
                    "timestamp {} is more than 24h in the future, clamped to now",
                    ts.to_rfc3339()
                ));
            }
            now
        }
        Some(ts) => ts,
    }
}

/* ----------------------------
Fetch orchestrator
---------------------------- */

#[derive(Debug, Clone, Copy)]
pub struct FetchTimeouts {
    pub default: Duration,
    /// Chat channels and federated timelines.
    pub slow: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(10),
            slow: Duration::from_secs(15),
        }
    }
}

impl FetchTimeouts {
    pub fn for_protocol(&self, p: Protocol) -> Duration {
        if p.is_slow() {
            self.slow
        } else {
            self.default
        }
    }
}

/// Result of one orchestrator batch. Always produced, never an error.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Deduplicated, newest first.
    pub items: Vec<NormalizedItem>,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deduped: usize,
}

/// Long-lived service: adapter registry, classifier and resilience caches.
pub struct Ingestor {
    providers: HashMap<Protocol, Arc<dyn SourceProvider>>,
    classifier: Arc<RegionClassifier>,
    caches: Arc<ResilienceCaches>,
    timeouts: FetchTimeouts,
}

impl Ingestor {
    /// Empty registry; add adapters with [`Ingestor::with_provider`].
    pub fn new(classifier: Arc<RegionClassifier>, caches: Arc<ResilienceCaches>) -> Self {
        Self {
            providers: HashMap::new(),
            classifier,
            caches,
            timeouts: FetchTimeouts::default(),
        }
    }

    /// Registry with every shipped adapter, wired from the app config.
    pub fn from_config(
        cfg: &AppConfig,
        classifier: Arc<RegionClassifier>,
        caches: Arc<ResilienceCaches>,
    ) -> Self {
        let client = http::http_client();
        let connector = cfg.chat_gateway.as_ref().map(|g| {
            Arc::new(RpcGatewayConnector::new(client.clone(), &g.url, &g.token))
                as Arc<dyn providers::chat::SessionConnector>
        });
        let chat = ChatChannelAdapter::new(client.clone(), connector, caches.clone());

        Self::new(classifier, caches)
            .with_timeouts(cfg.timeouts.to_fetch_timeouts())
            .with_provider(
                Protocol::Syndication,
                Arc::new(SyndicationAdapter::new(client.clone())),
            )
            .with_provider(
                Protocol::SocialGraph,
                Arc::new(SocialGraphAdapter::with_base(
                    client.clone(),
                    &cfg.social_api_base,
                )),
            )
            .with_provider(Protocol::ChatChannel, Arc::new(chat))
            .with_provider(
                Protocol::FederatedTimeline,
                Arc::new(FederatedTimelineAdapter::new(client.clone())),
            )
            .with_provider(Protocol::VideoFeed, Arc::new(VideoFeedAdapter::new(client)))
    }

    pub fn with_provider(mut self, protocol: Protocol, provider: Arc<dyn SourceProvider>) -> Self {
        self.providers.insert(protocol, provider);
        self
    }

    pub fn with_timeouts(mut self, timeouts: FetchTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn classifier(&self) -> &RegionClassifier {
        &self.classifier
    }

    pub fn caches(&self) -> &ResilienceCaches {
        &self.caches
    }

    /// Fetch one publisher under its own timeout.
    async fn fetch_one(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>> {
        let provider = self
            .providers
            .get(&publisher.protocol)
            .cloned()
            .ok_or(FetchError::Unsupported(publisher.protocol))?;
        let limit = self.timeouts.for_protocol(publisher.protocol);
        match tokio::time::timeout(limit, provider.fetch(publisher)).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Fan `publishers` out concurrently, fold failures into zero items,
    /// classify, deduplicate by id and sort newest-first.
    pub async fn fetch_batch(&self, publishers: &[Arc<Publisher>]) -> BatchOutcome {
        ensure_metrics_described();
        let now = Utc::now();
        let mut outcome = BatchOutcome::default();

        // Chat channels have a scrape fallback, so backoff is theirs to handle.
        let runnable: Vec<&Arc<Publisher>> = publishers
            .iter()
            .filter(|p| {
                let honor_backoff = p.protocol != Protocol::ChatChannel;
                match self.caches.skip_reason(&p.handle, now, honor_backoff) {
                    Some(kind) => {
                        tracing::debug!(
                            target: "ingest",
                            publisher = %p.id,
                            handle = %p.handle,
                            ?kind,
                            "skipping publisher (resilience cache)"
                        );
                        outcome.skipped += 1;
                        counter!("ingest_skipped_total").increment(1);
                        false
                    }
                    None => true,
                }
            })
            .collect();

        let results = join_all(runnable.into_iter().map(|p| async move {
            let t0 = Instant::now();
            let res = self.fetch_one(p).await;
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            (p, res)
        }))
        .await;

        let mut items = Vec::new();
        for (p, res) in results {
            match res {
                Ok(raw) => {
                    outcome.ok += 1;
                    self.caches.record_success(&p.handle);
                    counter!("ingest_events_total").increment(raw.len() as u64);
                    for r in raw {
                        for d in &r.diagnostics {
                            tracing::debug!(target: "ingest", publisher = %p.id, diagnostic = %d);
                        }
                        items.push(normalize(r, p, &self.classifier));
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        target: "ingest",
                        publisher = %p.id,
                        provider = self.providers.get(&p.protocol).map_or("none", |pr| pr.name()),
                        error = %e,
                        "provider error"
                    );
                    counter!("ingest_provider_errors_total").increment(1);
                    // Chat adapters keep their own per-path backoff keys.
                    let adapter_backoff =
                        p.protocol == Protocol::ChatChannel && e.kind() == FailureKind::RateLimited;
                    if !adapter_backoff {
                        self.caches.record_failure(&p.handle, &e, Utc::now());
                    }
                }
            }
        }

        let (items, deduped) = dedup_sorted(items);
        counter!("ingest_dedup_total").increment(deduped as u64);
        gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);

        tracing::info!(
            target: "ingest",
            kept = items.len(),
            ok = outcome.ok,
            failed = outcome.failed,
            skipped = outcome.skipped,
            deduped,
            "batch complete"
        );

        outcome.items = items;
        outcome.deduped = deduped;
        outcome
    }
}

/// Raw adapter item → canonical record with its single region assignment.
pub fn normalize(
    raw: RawItem,
    publisher: &Arc<Publisher>,
    classifier: &RegionClassifier,
) -> NormalizedItem {
    let key = raw
        .source_id
        .clone()
        .or_else(|| raw.permalink.clone())
        .unwrap_or_else(|| format!("{}|{}|{}", publisher.id, raw.title, raw.timestamp.timestamp()));
    let id = content_id(publisher.protocol.as_str(), &key);

    let region = match (publisher.single_region, publisher.default_region) {
        (true, Some(r)) => RegionAssignment {
            region: Some(r),
            fell_back: false,
        },
        _ => classifier.classify(
            &format!("{}\n{}", raw.title, raw.body),
            publisher.default_region,
        ),
    };

    NormalizedItem {
        id,
        title: raw.title,
        body: raw.body,
        publisher: publisher.clone(),
        timestamp: raw.timestamp,
        permalink: raw.permalink,
        media: raw.media,
        reply_to: raw.reply_to,
        repost_of: raw.repost_of,
        region,
    }
}

/// Keep the first occurrence of each id, then sort newest-first.
/// Returns (items, removed_count).
pub fn dedup_sorted(items: Vec<NormalizedItem>) -> (Vec<NormalizedItem>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut keep = Vec::with_capacity(items.len());
    let mut removed = 0usize;
    for it in items {
        if seen.insert(it.id.clone()) {
            keep.push(it);
        } else {
            removed += 1;
        }
    }
    keep.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    (keep, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use chrono::TimeZone;

    #[test]
    fn clean_text_strips_markup_and_entities() {
        let s = "<p>Hello,&nbsp;&nbsp;<b>world</b></p><br/>&#8220;quoted&#x201D; &amp; more";
        assert_eq!(clean_text(s), "Hello, world \"quoted\" & more");
    }

    #[test]
    fn clean_text_keeps_trailing_abbreviation_period() {
        assert_eq!(clean_text("Talks with the U.S."), "Talks with the U.S.");
    }

    #[test]
    fn content_id_is_stable_and_namespaced() {
        let a = content_id("syndication", "https://example.com/a");
        assert_eq!(a.len(), 16);
        assert_eq!(a, content_id("syndication", "https://example.com/a"));
        assert_ne!(a, content_id("video_feed", "https://example.com/a"));
    }

    #[test]
    fn future_timestamps_clamp_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();

        let mut diags = Vec::new();
        let near = clamp_timestamp(Some(now + ChronoDuration::hours(3)), None, now, &mut diags);
        assert_eq!(near, now);
        assert!(diags.is_empty());

        let far = clamp_timestamp(Some(now + ChronoDuration::hours(30)), None, now, &mut diags);
        assert_eq!(far, now);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].contains("more than 24h"));

        let past = now - ChronoDuration::hours(2);
        assert_eq!(clamp_timestamp(Some(past), None, now, &mut diags), past);

        assert_eq!(clamp_timestamp(None, Some("garbage"), now, &mut diags), now);
        assert!(diags[1].contains("garbage"));
    }

    #[test]
    fn truncate_title_marks_cut() {
        assert_eq!(truncate_title("short", 10), "short");
        assert_eq!(truncate_title("abcdefghij klm", 10), "abcdefghij…");
    }

    fn publisher(single: bool) -> Arc<Publisher> {
        Arc::new(Publisher {
            id: "p1".into(),
            name: "P1".into(),
            protocol: Protocol::Syndication,
            handle: "https://example.com/feed".into(),
            default_region: Some(Region::Europe),
            single_region: single,
            tier: 2,
            confidence: 0.8,
            posts_per_day: 10.0,
        })
    }

    #[test]
    fn single_region_publisher_skips_classification() {
        let clf = RegionClassifier::builtin().unwrap();
        let now = Utc::now();
        let raw = RawItem::new("Explosions reported in Gaza", "", now);
        let it = normalize(raw.clone(), &publisher(true), &clf);
        assert_eq!(it.region.region, Some(Region::Europe));
        assert!(!it.region.fell_back);

        let it = normalize(raw, &publisher(false), &clf);
        assert_eq!(it.region.region, Some(Region::MiddleEast));
    }

    #[test]
    fn dedup_keeps_first_and_sorts_newest_first() {
        let clf = RegionClassifier::builtin().unwrap();
        let p = publisher(false);
        let t = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
        let mk = |id: &str, title: &str, ts| {
            let mut r = RawItem::new(title, "", ts);
            r.source_id = Some(id.to_string());
            normalize(r, &p, &clf)
        };
        let items = vec![
            mk("a", "first", t - ChronoDuration::hours(2)),
            mk("b", "second", t),
            mk("a", "dup of first", t + ChronoDuration::hours(1)),
        ];
        let (kept, removed) = dedup_sorted(items);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "second");
        assert_eq!(kept[1].title, "first");
    }
}
