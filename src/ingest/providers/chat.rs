// src/ingest/providers/chat.rs
//! Public broadcast channels.
//!
//! Primary path is an authenticated session behind an RPC gateway; the
//! fallback is the public web preview page. The session is created lazily
//! and at most once at a time, shared by every channel fetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::ingest::error::{FetchError, FetchResult};
use crate::ingest::providers::media_placeholder;
use crate::ingest::types::{
    MediaAttachment, MediaKind, Publisher, RawItem, ReplyContext, RepostContext, SourceProvider,
};
use crate::ingest::{clamp_timestamp, clean_text, http, truncate_title};
use crate::resilience::ResilienceCaches;

pub const DEFAULT_PREVIEW_BASE: &str = "https://t.me/s";
const DEFAULT_LIMIT: usize = 20;
/// After a failed connect, don't retry the session for this long.
const CONNECT_COOLOFF: Duration = Duration::from_secs(60);

/// One message as returned by an authenticated session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    /// Unix seconds.
    pub date: i64,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyContext>,
    /// Original channel or author when forwarded.
    #[serde(default)]
    pub forwarded_from: Option<String>,
}

#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn recent_messages(&self, channel: &str, limit: usize) -> FetchResult<Vec<ChatMessage>>;
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> FetchResult<Arc<dyn ChatSession>>;
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Arc<dyn ChatSession>>,
    failed_at: Option<Instant>,
}

pub struct ChatChannelAdapter {
    client: reqwest::Client,
    connector: Option<Arc<dyn SessionConnector>>,
    // Held across `connect()`: concurrent fetches wait here instead of
    // opening sessions of their own.
    slot: Mutex<SessionSlot>,
    caches: Arc<ResilienceCaches>,
    preview_base: String,
    limit: usize,
}

impl ChatChannelAdapter {
    pub fn new(
        client: reqwest::Client,
        connector: Option<Arc<dyn SessionConnector>>,
        caches: Arc<ResilienceCaches>,
    ) -> Self {
        Self {
            client,
            connector,
            slot: Mutex::new(SessionSlot::default()),
            caches,
            preview_base: DEFAULT_PREVIEW_BASE.to_string(),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_preview_base(mut self, base: &str) -> Self {
        self.preview_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Shared session, connecting on first use.
    async fn session(&self) -> Option<Arc<dyn ChatSession>> {
        let connector = self.connector.as_ref()?;
        let mut slot = self.slot.lock().await;
        if let Some(s) = &slot.session {
            return Some(s.clone());
        }
        if slot.failed_at.is_some_and(|t| t.elapsed() < CONNECT_COOLOFF) {
            return None;
        }
        match connector.connect().await {
            Ok(s) => {
                tracing::info!(target: "ingest", "chat session established");
                slot.session = Some(s.clone());
                slot.failed_at = None;
                Some(s)
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "chat session connect failed");
                slot.failed_at = Some(Instant::now());
                None
            }
        }
    }

    async fn reset_session(&self) {
        self.slot.lock().await.session = None;
    }

    async fn scrape(&self, channel: &str, now: DateTime<Utc>) -> FetchResult<Vec<RawItem>> {
        let key = preview_backoff_key(channel);
        if let Some(left) = self.caches.backoff_remaining(&key, now) {
            return Err(FetchError::RateLimited {
                retry_after: left.to_std().unwrap_or_default(),
            });
        }

        let url = format!("{}/{}", self.preview_base, channel);
        let html = match http::get_text(&self.client, &url).await {
            Ok(html) => html,
            Err(FetchError::RateLimited { retry_after }) => {
                tracing::warn!(
                    target: "ingest",
                    channel = %channel,
                    wait_s = retry_after.as_secs(),
                    "chat preview page rate limited"
                );
                self.caches.record_backoff(&key, retry_after, now);
                return Err(FetchError::RateLimited { retry_after });
            }
            Err(e) => return Err(e),
        };
        let items = parse_preview_html(channel, &html, now);
        if items.is_empty() && !html.contains("tgme_channel_info") {
            return Err(FetchError::NotFound(channel.to_string()));
        }
        let skip = items.len().saturating_sub(self.limit);
        Ok(items.into_iter().skip(skip).collect())
    }
}

/// `@name`, `t.me/name`, `https://t.me/s/name` → `name`.
pub fn channel_name(handle: &str) -> String {
    let h = handle.trim().trim_end_matches('/');
    let h = h.rsplit('/').next().unwrap_or(h);
    h.trim_start_matches('@').to_string()
}

/// Backoff keys for the two paths, kept apart so a wait on one never
/// blocks the other.
pub fn session_backoff_key(channel: &str) -> String {
    format!("session:{channel}")
}

pub fn preview_backoff_key(channel: &str) -> String {
    format!("preview:{channel}")
}

fn message_permalink(channel: &str, id: &str) -> String {
    format!("https://t.me/{channel}/{id}")
}

fn messages_to_items(channel: &str, msgs: Vec<ChatMessage>, now: DateTime<Utc>) -> Vec<RawItem> {
    msgs.into_iter()
        .map(|m| {
            let text = clean_text(&m.text);
            let mut media = Vec::new();
            if let Some(url) = m.photo_url {
                media.push(MediaAttachment {
                    kind: MediaKind::Image,
                    url,
                    thumbnail: None,
                    caption: None,
                });
            }
            if let Some(url) = m.video_url {
                media.push(MediaAttachment {
                    kind: MediaKind::Video,
                    url,
                    thumbnail: None,
                    caption: None,
                });
            }
            let title = if text.is_empty() {
                media_placeholder(&media).to_string()
            } else {
                truncate_title(&text, 200)
            };
            let mut item = RawItem::new(title, text, now);
            let parsed = Utc.timestamp_opt(m.date, 0).single();
            let raw_date = m.date.to_string();
            item.timestamp = clamp_timestamp(parsed, Some(&raw_date), now, &mut item.diagnostics);
            item.source_id = Some(format!("{channel}/{}", m.id));
            item.permalink = Some(message_permalink(channel, &m.id.to_string()));
            item.media = media;
            item.reply_to = m.reply_to;
            item.repost_of = m.forwarded_from.map(|orig| RepostContext {
                original_author: orig,
                reposted_by: channel.to_string(),
            });
            item
        })
        .collect()
}

#[async_trait]
impl SourceProvider for ChatChannelAdapter {
    async fn fetch(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>> {
        let channel = channel_name(&publisher.handle);
        let session_key = session_backoff_key(&channel);
        let now = Utc::now();

        // Inside a session backoff window go straight to the preview page.
        if self.caches.backoff_remaining(&session_key, now).is_none() {
            if let Some(session) = self.session().await {
                match session.recent_messages(&channel, self.limit).await {
                    Ok(msgs) => return Ok(messages_to_items(&channel, msgs, now)),
                    Err(FetchError::RateLimited { retry_after }) => {
                        tracing::warn!(
                            target: "ingest",
                            channel = %channel,
                            wait_s = retry_after.as_secs(),
                            "chat session rate limited, using preview page"
                        );
                        self.caches.record_backoff(&session_key, retry_after, now);
                    }
                    Err(e @ FetchError::NotFound(_)) => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            target: "ingest",
                            channel = %channel,
                            error = %e,
                            "chat session failed, resetting"
                        );
                        self.reset_session().await;
                    }
                }
            }
        }

        self.scrape(&channel, now).await
    }

    fn name(&self) -> &'static str {
        "chat_channel"
    }
}

/* ----------------------------
Web preview scraping
---------------------------- */

static RE_DATA_POST: Lazy<Regex> = Lazy::new(|| Regex::new(r#"data-post="([^"]+)""#).unwrap());
static RE_MSG_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<div class="tgme_widget_message_text[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});
static RE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<time[^>]*datetime="([^"]+)""#).unwrap());
static RE_PHOTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"tgme_widget_message_photo_wrap[^>]*background-image:url\('([^']+)'\)"#).unwrap()
});
static RE_VIDEO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<video[^>]*src="([^"]+)""#).unwrap()
});
static RE_VIDEO_THUMB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"tgme_widget_message_video_thumb[^>]*background-image:url\('([^']+)'\)"#).unwrap()
});
static RE_REPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a class="tgme_widget_message_reply"[^>]*>(.*?)</a>"#).unwrap()
});
static RE_AUTHOR_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<span class="tgme_widget_message_author_name"[^>]*>(.*?)</span>"#).unwrap()
});
static RE_METATEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<div class="tgme_widget_message_metatext[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});
static RE_FORWARDED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a class="tgme_widget_message_forwarded_from_name"[^>]*>(.*?)</a>"#).unwrap()
});

fn capture<'a>(re: &Regex, s: &'a str) -> Option<&'a str> {
    re.captures(s).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Parse the public preview page of `channel`. Messages without an id are
/// skipped; everything else is best effort.
pub fn parse_preview_html(channel: &str, html: &str, now: DateTime<Utc>) -> Vec<RawItem> {
    let starts: Vec<(usize, &str)> = RE_DATA_POST
        .captures_iter(html)
        .filter_map(|c| Some((c.get(0)?.start(), c.get(1)?.as_str())))
        .collect();

    let mut out = Vec::with_capacity(starts.len());
    for (i, (start, post)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(html.len());
        let seg = &html[*start..end];
        let Some(msg_id) = post.rsplit('/').next().filter(|s| !s.is_empty()) else {
            continue;
        };

        let text = capture(&RE_MSG_TEXT, seg).map(clean_text).unwrap_or_default();

        let mut media: Vec<MediaAttachment> = RE_PHOTO
            .captures_iter(seg)
            .filter_map(|c| c.get(1))
            .map(|m| MediaAttachment {
                kind: MediaKind::Image,
                url: m.as_str().to_string(),
                thumbnail: None,
                caption: None,
            })
            .collect();
        if let Some(src) = capture(&RE_VIDEO, seg) {
            media.push(MediaAttachment {
                kind: MediaKind::Video,
                url: src.to_string(),
                thumbnail: capture(&RE_VIDEO_THUMB, seg).map(str::to_string),
                caption: None,
            });
        }

        let title = if text.is_empty() {
            media_placeholder(&media).to_string()
        } else {
            truncate_title(&text, 200)
        };

        let raw_date = capture(&RE_TIME, seg);
        let parsed = raw_date
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));

        let mut item = RawItem::new(title, text, now);
        item.timestamp = clamp_timestamp(parsed, raw_date, now, &mut item.diagnostics);
        item.source_id = Some(format!("{channel}/{msg_id}"));
        item.permalink = Some(message_permalink(channel, msg_id));
        item.media = media;
        item.reply_to = capture(&RE_REPLY, seg).map(|reply| ReplyContext {
            author: capture(&RE_AUTHOR_NAME, reply)
                .map(clean_text)
                .filter(|s| !s.is_empty()),
            text: capture(&RE_METATEXT, reply)
                .map(clean_text)
                .filter(|s| !s.is_empty()),
            target: None,
        });
        item.repost_of = capture(&RE_FORWARDED, seg)
            .map(clean_text)
            .filter(|s| !s.is_empty())
            .map(|orig| RepostContext {
                original_author: orig,
                reposted_by: channel.to_string(),
            });
        out.push(item);
    }
    out
}

/* ----------------------------
RPC gateway session
---------------------------- */

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenResult {
    session: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResult {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

static RE_FLOOD_WAIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"FLOOD_WAIT_(\d+)").unwrap());

/// Gateway error strings → fetch taxonomy.
pub fn map_rpc_error(message: &str) -> FetchError {
    if let Some(secs) = capture(&RE_FLOOD_WAIT, message).and_then(|s| s.parse::<u64>().ok()) {
        return FetchError::RateLimited {
            retry_after: Duration::from_secs(secs),
        };
    }
    if message.contains("CHANNEL_INVALID")
        || message.contains("CHANNEL_PRIVATE")
        || message.contains("USERNAME_")
    {
        return FetchError::NotFound(message.to_string());
    }
    if message.contains("AUTH_KEY_") || message.contains("SESSION_REVOKED") {
        return FetchError::Unauthorized(message.to_string());
    }
    FetchError::Rpc(message.to_string())
}

async fn rpc_call<T: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    endpoint: &str,
    token: &str,
    method: &str,
    params: serde_json::Value,
) -> FetchResult<T> {
    let resp = client
        .post(endpoint)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&json!({ "method": method, "params": params }))
        .send()
        .await?;
    let resp = http::check_status(resp, endpoint)?;
    let env: RpcEnvelope<T> = resp.json().await?;
    if let Some(err) = env.error {
        return Err(map_rpc_error(&err.message));
    }
    env.result
        .ok_or_else(|| FetchError::Malformed(format!("{method}: empty result")))
}

pub struct RpcGatewayConnector {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl RpcGatewayConnector {
    pub fn new(client: reqwest::Client, url: &str, token: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/rpc", url.trim_end_matches('/')),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl SessionConnector for RpcGatewayConnector {
    async fn connect(&self) -> FetchResult<Arc<dyn ChatSession>> {
        let opened: OpenResult =
            rpc_call(&self.client, &self.endpoint, &self.token, "session.open", json!({})).await?;
        Ok(Arc::new(RpcGatewaySession {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            session: opened.session,
        }))
    }
}

struct RpcGatewaySession {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    session: String,
}

#[async_trait]
impl ChatSession for RpcGatewaySession {
    async fn recent_messages(&self, channel: &str, limit: usize) -> FetchResult<Vec<ChatMessage>> {
        let res: HistoryResult = rpc_call(
            &self.client,
            &self.endpoint,
            &self.token,
            "messages.history",
            json!({ "session": self.session, "channel": channel, "limit": limit }),
        )
        .await?;
        Ok(res.messages)
    }
}
