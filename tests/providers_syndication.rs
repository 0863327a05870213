use std::fs;
use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use chrono::{TimeZone, Utc};
use region_pulse::ingest::error::FetchError;
use region_pulse::ingest::providers::syndication::{parse_feed, SyndicationAdapter};
use region_pulse::ingest::types::{MediaKind, Protocol, Publisher, SourceProvider};

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn publisher(handle: String) -> Publisher {
    Publisher {
        id: "wire".into(),
        name: "Wire".into(),
        protocol: Protocol::Syndication,
        handle,
        default_region: None,
        single_region: false,
        tier: 1,
        confidence: 0.9,
        posts_per_day: 40.0,
    }
}

#[test]
fn rss_fixture_parses_every_well_formed_item() {
    let xml = fs::read_to_string("tests/fixtures/world_rss.xml").expect("missing world_rss.xml");
    let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
    let items = parse_feed(&xml, now);

    // the orphan item without title and link is dropped
    assert_eq!(items.len(), 3);

    assert_eq!(items[0].title, "Ceasefire talks resume as Gaza aid convoys wait");
    assert_eq!(items[0].body, "Negotiators met in Cairo on Saturday.");
    assert_eq!(items[0].source_id.as_deref(), Some("urn:news:1001"));
    assert_eq!(items[0].media[0].kind, MediaKind::Image);
    assert_eq!(items[0].timestamp, Utc.with_ymd_and_hms(2025, 9, 6, 9, 15, 0).unwrap());

    assert_eq!(items[1].title, "Bundestag debates defence budget & NATO targets");
    assert_eq!(items[1].body, "Lawmakers in Berlin argued over the \"two percent\" goal.");
    assert_eq!(items[1].timestamp, Utc.with_ymd_and_hms(2025, 9, 6, 6, 0, 0).unwrap());

    // JST is +9
    assert_eq!(items[2].timestamp, Utc.with_ymd_and_hms(2025, 9, 6, 6, 30, 0).unwrap());
    assert!(items.iter().all(|i| i.diagnostics.is_empty()));
}

#[test]
fn atom_fixture_parses_entries() {
    let xml = fs::read_to_string("tests/fixtures/atom_feed.xml").expect("missing atom_feed.xml");
    let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
    let items = parse_feed(&xml, now);
    assert_eq!(items.len(), 2);

    assert_eq!(
        items[0].permalink.as_deref(),
        Some("https://agency.example.org/2025/09/caracas")
    );
    assert_eq!(items[0].body, "Supporters filled the square.");

    assert_eq!(items[1].body, "Regional ministers met in Niamey.");
    assert_eq!(items[1].timestamp, Utc.with_ymd_and_hms(2025, 9, 6, 6, 0, 0).unwrap());
}

#[tokio::test]
async fn adapter_fetches_over_http_and_maps_failures() {
    let rss = fs::read_to_string("tests/fixtures/world_rss.xml").unwrap();
    let app = Router::new()
        .route("/feed.xml", get(move || async move { rss }))
        .route("/html", get(|| async { "<html><body>not a feed</body></html>" }))
        .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
        .route("/busy", get(|| async { StatusCode::TOO_MANY_REQUESTS }));
    let addr = serve(app).await;
    let adapter = SyndicationAdapter::new(reqwest::Client::new());

    let items = adapter
        .fetch(&publisher(format!("http://{addr}/feed.xml")))
        .await
        .unwrap();
    assert_eq!(items.len(), 3);

    let err = adapter
        .fetch(&publisher(format!("http://{addr}/html")))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)), "{err:?}");

    let err = adapter
        .fetch(&publisher(format!("http://{addr}/gone")))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)), "{err:?}");

    let err = adapter
        .fetch(&publisher(format!("http://{addr}/busy")))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { .. }), "{err:?}");
}
