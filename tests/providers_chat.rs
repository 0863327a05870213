use std::fs;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router};
use chrono::{TimeZone, Utc};
use region_pulse::ingest::error::{FetchError, FetchResult};
use region_pulse::ingest::providers::chat::{
    parse_preview_html, preview_backoff_key, session_backoff_key, ChatChannelAdapter, ChatMessage,
    ChatSession, SessionConnector,
};
use region_pulse::ingest::types::{Protocol, Publisher, SourceProvider};
use region_pulse::resilience::ResilienceCaches;

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn preview_server() -> SocketAddr {
    let html = fs::read_to_string("tests/fixtures/chat_preview.html").unwrap();
    serve(Router::new().route(
        "/s/exampledesk",
        get(move || async move { axum::response::Html(html) }),
    ))
    .await
}

fn publisher() -> Publisher {
    Publisher {
        id: "desk".into(),
        name: "Example Desk".into(),
        protocol: Protocol::ChatChannel,
        handle: "@exampledesk".into(),
        default_region: None,
        single_region: false,
        tier: 3,
        confidence: 0.5,
        posts_per_day: 30.0,
    }
}

/// Always rate-limited; counts calls.
struct FloodedSession {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatSession for FloodedSession {
    async fn recent_messages(&self, _channel: &str, _limit: usize) -> FetchResult<Vec<ChatMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::RateLimited {
            retry_after: Duration::from_secs(120),
        })
    }
}

struct FixedConnector(Arc<FloodedSession>);

#[async_trait]
impl SessionConnector for FixedConnector {
    async fn connect(&self) -> FetchResult<Arc<dyn ChatSession>> {
        Ok(self.0.clone())
    }
}

struct BrokenConnector;

#[async_trait]
impl SessionConnector for BrokenConnector {
    async fn connect(&self) -> FetchResult<Arc<dyn ChatSession>> {
        Err(FetchError::Unauthorized("gateway".into()))
    }
}

#[test]
fn preview_fixture_strips_markup_and_builds_permalinks() {
    let html = fs::read_to_string("tests/fixtures/chat_preview.html").expect("missing fixture");
    let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
    let items = parse_preview_html("exampledesk", &html, now);
    assert_eq!(items.len(), 3);

    assert!(items[0].body.starts_with("\u{26a1}"));
    assert!(items[0].body.contains("Sirens in the north of Israel, IDF says interceptors launched"));
    assert!(!items[0].body.contains('<'));
    assert_eq!(items[0].permalink.as_deref(), Some("https://t.me/exampledesk/501"));

    assert_eq!(items[1].body, "Update: all clear & no injuries reported");
    assert_eq!(
        items[1].reply_to.as_ref().and_then(|r| r.text.as_deref()),
        Some("Sirens in the north of Israel")
    );

    assert_eq!(items[2].title, "[Image]");
    assert_eq!(items[2].repost_of.as_ref().unwrap().original_author, "Other Wire");
}

#[tokio::test]
async fn without_a_session_the_preview_page_is_used() {
    let addr = preview_server().await;
    let adapter = ChatChannelAdapter::new(
        reqwest::Client::new(),
        Some(Arc::new(BrokenConnector) as Arc<dyn SessionConnector>),
        Arc::new(ResilienceCaches::new()),
    )
    .with_preview_base(&format!("http://{addr}/s"));

    let items = adapter.fetch(&publisher()).await.unwrap();
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn rate_limited_session_falls_back_and_backs_off() {
    let addr = preview_server().await;
    let session = Arc::new(FloodedSession {
        calls: AtomicUsize::new(0),
    });
    let caches = Arc::new(ResilienceCaches::new());
    let adapter = ChatChannelAdapter::new(
        reqwest::Client::new(),
        Some(Arc::new(FixedConnector(session.clone())) as Arc<dyn SessionConnector>),
        caches.clone(),
    )
    .with_preview_base(&format!("http://{addr}/s"));

    let items = adapter.fetch(&publisher()).await.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(session.calls.load(Ordering::SeqCst), 1);
    assert!(caches
        .backoff_remaining(&session_backoff_key("exampledesk"), Utc::now())
        .is_some());
    assert!(caches
        .backoff_remaining(&preview_backoff_key("exampledesk"), Utc::now())
        .is_none());

    // inside the backoff window the session is not consulted
    let items = adapter.fetch(&publisher()).await.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(session.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_channel_is_not_found() {
    let addr = serve(Router::new().route(
        "/s/{name}",
        get(|| async { axum::response::Html("<html><body>redirect</body></html>") }),
    ))
    .await;
    let adapter = ChatChannelAdapter::new(
        reqwest::Client::new(),
        None,
        Arc::new(ResilienceCaches::new()),
    )
    .with_preview_base(&format!("http://{addr}/s"));

    let err = adapter.fetch(&publisher()).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn rate_limited_preview_page_is_not_hit_again_during_backoff() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = serve(Router::new().route(
        "/s/exampledesk",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    [(axum::http::header::RETRY_AFTER, "90")],
                    "slow down",
                )
            }
        }),
    ))
    .await;
    let caches = Arc::new(ResilienceCaches::new());
    let adapter = ChatChannelAdapter::new(reqwest::Client::new(), None, caches.clone())
        .with_preview_base(&format!("http://{addr}/s"));

    let err = adapter.fetch(&publisher()).await.unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { .. }), "{err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(caches
        .backoff_remaining(&preview_backoff_key("exampledesk"), Utc::now())
        .is_some());
    // the session path stays open
    assert!(caches
        .backoff_remaining(&session_backoff_key("exampledesk"), Utc::now())
        .is_none());

    let err = adapter.fetch(&publisher()).await.unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { .. }), "{err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
