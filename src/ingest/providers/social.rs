// src/ingest/providers/social.rs
//! Public social-graph author feeds (AT protocol `getAuthorFeed`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::config::DEFAULT_SOCIAL_API;
use crate::ingest::error::{FetchError, FetchResult};
use crate::ingest::providers::media_placeholder;
use crate::ingest::types::{
    MediaAttachment, MediaKind, Publisher, RawItem, ReplyContext, RepostContext, SourceProvider,
};
use crate::ingest::{clamp_timestamp, clean_text, http, truncate_title};

const FEED_LIMIT: &str = "30";

#[derive(Debug, Deserialize)]
struct AuthorFeed {
    /// Decoded entry by entry so one bad post only drops itself.
    #[serde(default)]
    feed: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedViewPost {
    post: PostView,
    #[serde(default)]
    reply: Option<ReplyRef>,
    #[serde(default)]
    reason: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PostView {
    uri: String,
    author: Author,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    embed: Option<Value>,
    #[serde(rename = "indexedAt", default)]
    indexed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct ReplyRef {
    #[serde(default)]
    parent: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

fn str_at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

/// `at://did/app.bsky.feed.post/<rkey>` → web permalink.
fn permalink(uri: &str, handle: &str) -> Option<String> {
    let rkey = uri.rsplit('/').next().filter(|s| !s.is_empty())?;
    Some(format!("https://bsky.app/profile/{handle}/post/{rkey}"))
}

fn embed_media(embed: &Value) -> Vec<MediaAttachment> {
    let kind = embed.get("$type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "app.bsky.embed.images#view" => embed
            .get("images")
            .and_then(Value::as_array)
            .map(|imgs| {
                imgs.iter()
                    .filter_map(|img| {
                        let url = img.get("fullsize").and_then(Value::as_str)?;
                        Some(MediaAttachment {
                            kind: MediaKind::Image,
                            url: url.to_string(),
                            thumbnail: str_at(img, &["thumb"]).map(str::to_string),
                            caption: str_at(img, &["alt"])
                                .filter(|s| !s.is_empty())
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default(),
        "app.bsky.embed.video#view" => str_at(embed, &["playlist"])
            .map(|url| {
                vec![MediaAttachment {
                    kind: MediaKind::Video,
                    url: url.to_string(),
                    thumbnail: str_at(embed, &["thumbnail"]).map(str::to_string),
                    caption: str_at(embed, &["alt"])
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                }]
            })
            .unwrap_or_default(),
        "app.bsky.embed.external#view" => str_at(embed, &["external", "uri"])
            .map(|url| {
                vec![MediaAttachment {
                    kind: MediaKind::Link,
                    url: url.to_string(),
                    thumbnail: str_at(embed, &["external", "thumb"]).map(str::to_string),
                    caption: str_at(embed, &["external", "title"])
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                }]
            })
            .unwrap_or_default(),
        "app.bsky.embed.recordWithMedia#view" => {
            embed.get("media").map(embed_media).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn reply_context(parent: &Value) -> ReplyContext {
    ReplyContext {
        author: str_at(parent, &["author", "handle"]).map(str::to_string),
        text: str_at(parent, &["record", "text"])
            .map(clean_text)
            .filter(|s| !s.is_empty()),
        target: str_at(parent, &["uri"]).map(str::to_string),
    }
}

fn parse_ts(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Parse a `getAuthorFeed` response body.
pub fn parse_author_feed(json: &str, now: DateTime<Utc>) -> FetchResult<Vec<RawItem>> {
    let feed: AuthorFeed =
        serde_json::from_str(json).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let mut out = Vec::with_capacity(feed.feed.len());
    for raw in feed.feed {
        let entry: FeedViewPost = match serde_json::from_value(raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(target: "ingest", error = %e, "dropping malformed feed entry");
                continue;
            }
        };
        let post = entry.post;
        let text = str_at(&post.record, &["text"]).map(clean_text).unwrap_or_default();
        let media = post.embed.as_ref().map(embed_media).unwrap_or_default();
        if text.is_empty() && media.is_empty() {
            continue;
        }

        let title = if text.is_empty() {
            media_placeholder(&media).to_string()
        } else {
            truncate_title(&text, 200)
        };

        let created = str_at(&post.record, &["createdAt"]).or(post.indexed_at.as_deref());
        let mut item = RawItem::new(title, text, now);
        item.timestamp = clamp_timestamp(parse_ts(created), created, now, &mut item.diagnostics);
        item.permalink = permalink(&post.uri, &post.author.handle);
        item.media = media;
        item.reply_to = entry
            .reply
            .and_then(|r| r.parent)
            .map(|p| reply_context(&p));

        let is_repost = entry
            .reason
            .as_ref()
            .and_then(|r| r.get("$type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t.ends_with("#reasonRepost"));
        if is_repost {
            if let Some(by) = entry.reason.as_ref().and_then(|r| str_at(r, &["by", "handle"])) {
                item.repost_of = Some(RepostContext {
                    original_author: post.author.handle.clone(),
                    reposted_by: by.to_string(),
                });
            }
        }
        item.source_id = Some(post.uri);
        out.push(item);
    }
    Ok(out)
}

pub struct SocialGraphAdapter {
    client: reqwest::Client,
    base: String,
}

impl SocialGraphAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, DEFAULT_SOCIAL_API)
    }

    pub fn with_base(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceProvider for SocialGraphAdapter {
    async fn fetch(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>> {
        let url = format!("{}/xrpc/app.bsky.feed.getAuthorFeed", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("actor", publisher.handle.as_str()), ("limit", FEED_LIMIT)])
            .send()
            .await?;

        // Unknown actors come back as 400 with an XRPC error body.
        if resp.status() == StatusCode::BAD_REQUEST {
            let body = resp.text().await.unwrap_or_default();
            let err: XrpcError = serde_json::from_str(&body).unwrap_or_else(|_| XrpcError {
                error: String::new(),
                message: body.clone(),
            });
            if err.error == "InvalidRequest" || err.error == "NotFound" {
                return Err(FetchError::NotFound(publisher.handle.clone()));
            }
            return Err(FetchError::Malformed(format!("{}: {}", err.error, err.message)));
        }

        let body = http::check_status(resp, &publisher.handle)?.text().await?;
        parse_author_feed(&body, Utc::now())
    }

    fn name(&self) -> &'static str {
        "social_graph"
    }
}
