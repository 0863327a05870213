use std::fs;
use std::net::SocketAddr;

use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
use chrono::{TimeZone, Utc};
use region_pulse::ingest::error::FetchError;
use region_pulse::ingest::providers::social::{parse_author_feed, SocialGraphAdapter};
use region_pulse::ingest::types::{MediaKind, Protocol, Publisher, SourceProvider};
use serde_json::{json, Value};
use std::collections::HashMap;

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn publisher(handle: &str) -> Publisher {
    Publisher {
        id: handle.into(),
        name: handle.into(),
        protocol: Protocol::SocialGraph,
        handle: handle.into(),
        default_region: None,
        single_region: false,
        tier: 2,
        confidence: 0.6,
        posts_per_day: 12.0,
    }
}

#[test]
fn fixture_feed_covers_embeds_replies_and_reposts() {
    let json = fs::read_to_string("tests/fixtures/social_feed.json").expect("missing fixture");
    let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
    let items = parse_author_feed(&json, now).unwrap();
    assert_eq!(items.len(), 3);

    let link = &items[0];
    assert_eq!(link.title, "Kremlin denies drone claims over Kyiv");
    assert_eq!(link.media[0].kind, MediaKind::Link);
    assert_eq!(link.media[0].caption.as_deref(), Some("Kremlin denies claims"));

    let reply = items[1].reply_to.as_ref().unwrap();
    assert_eq!(reply.author.as_deref(), Some("reporter.example.social"));
    assert_eq!(reply.text.as_deref(), Some("Any word on the second convoy?"));
    assert_eq!(
        reply.target.as_deref(),
        Some("at://did:plc:other/app.bsky.feed.post/par1")
    );

    let repost = &items[2];
    assert_eq!(repost.title, "[Image]");
    let ctx = repost.repost_of.as_ref().unwrap();
    assert_eq!(ctx.original_author, "photog.example.social");
    assert_eq!(ctx.reposted_by, "desk.example.social");
    assert_eq!(
        repost.permalink.as_deref(),
        Some("https://bsky.app/profile/photog.example.social/post/3lbx3")
    );
}

#[tokio::test]
async fn unknown_actor_maps_to_not_found() {
    let feed = fs::read_to_string("tests/fixtures/social_feed.json").unwrap();
    let feed: Value = serde_json::from_str(&feed).unwrap();
    let app = Router::new().route(
        "/xrpc/app.bsky.feed.getAuthorFeed",
        get(move |Query(q): Query<HashMap<String, String>>| {
            let feed = feed.clone();
            async move {
                match q.get("actor").map(String::as_str) {
                    Some("desk.example.social") => (StatusCode::OK, Json(feed)),
                    _ => (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": "InvalidRequest", "message": "Profile not found"})),
                    ),
                }
            }
        }),
    );
    let addr = serve(app).await;
    let adapter = SocialGraphAdapter::with_base(reqwest::Client::new(), &format!("http://{addr}/"));

    let items = adapter.fetch(&publisher("desk.example.social")).await.unwrap();
    assert_eq!(items.len(), 3);

    let err = adapter.fetch(&publisher("nobody.example")).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)), "{err:?}");
}
