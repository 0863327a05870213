// src/ingest/types.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::error::FetchResult;
use crate::region::{Region, RegionAssignment};

/// Wire protocol a publisher is addressed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Syndication,
    SocialGraph,
    ChatChannel,
    FederatedTimeline,
    VideoFeed,
}

impl Protocol {
    /// Protocols known to answer slowly get the longer per-fetch timeout.
    pub fn is_slow(&self) -> bool {
        matches!(self, Protocol::ChatChannel | Protocol::FederatedTimeline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Syndication => "syndication",
            Protocol::SocialGraph => "social_graph",
            Protocol::ChatChannel => "chat_channel",
            Protocol::FederatedTimeline => "federated_timeline",
            Protocol::VideoFeed => "video_feed",
        }
    }
}

fn default_tier() -> u8 {
    3
}
fn default_confidence() -> f32 {
    0.5
}

/// Static publisher configuration, loaded once per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    /// URL, actor handle, channel name or `user@instance`, depending on protocol.
    pub handle: String,
    /// Absent means "none".
    #[serde(default)]
    pub default_region: Option<Region>,
    /// Posts always belong to `default_region`; text is not classified.
    #[serde(default)]
    pub single_region: bool,
    /// Credibility tier, 1 (wire service) to 4 (aggregator).
    #[serde(default = "default_tier")]
    pub tier: u8,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Baseline math only.
    #[serde(default)]
    pub posts_per_day: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub url: String,
    pub thumbnail: Option<String>,
    pub caption: Option<String>,
}

/// "This is a reply to X".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub author: Option<String>,
    pub text: Option<String>,
    /// Upstream identifier or URI of the parent post.
    pub target: Option<String>,
}

/// "This is a repost of X": attribution stays with the original author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepostContext {
    pub original_author: String,
    pub reposted_by: String,
}

/// Intermediate item shape every adapter produces.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    /// Source-provided unique id (guid, status uri, ...).
    pub source_id: Option<String>,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub permalink: Option<String>,
    pub media: Vec<MediaAttachment>,
    pub reply_to: Option<ReplyContext>,
    pub repost_of: Option<RepostContext>,
    /// Non-fatal parse notes, e.g. clamped timestamps.
    pub diagnostics: Vec<String>,
}

impl RawItem {
    pub fn new(title: impl Into<String>, body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: None,
            title: title.into(),
            body: body.into(),
            timestamp,
            permalink: None,
            media: Vec::new(),
            reply_to: None,
            repost_of: None,
            diagnostics: Vec::new(),
        }
    }
}

/// Canonical ingested record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    /// Content-addressed: hash of the source unique id or permalink.
    pub id: String,
    pub title: String,
    pub body: String,
    pub publisher: Arc<Publisher>,
    pub timestamp: DateTime<Utc>,
    pub permalink: Option<String>,
    pub media: Vec<MediaAttachment>,
    pub reply_to: Option<ReplyContext>,
    pub repost_of: Option<RepostContext>,
    pub region: RegionAssignment,
}

impl NormalizedItem {
    /// Text the classifier sees.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// One adapter per wire format. Implementations must not panic on bad
/// payloads; errors are folded into "zero items" by the orchestrator.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>>;
    fn name(&self) -> &'static str;
}
