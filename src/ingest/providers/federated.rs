// src/ingest/providers/federated.rs
//! Federated-timeline accounts (`user@instance`, Mastodon-compatible API).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::error::{FetchError, FetchResult};
use crate::ingest::providers::media_placeholder;
use crate::ingest::types::{
    MediaAttachment, MediaKind, Publisher, RawItem, ReplyContext, RepostContext, SourceProvider,
};
use crate::ingest::{clamp_timestamp, clean_text, http, truncate_title};

const STATUS_LIMIT: &str = "20";

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusAccount {
    acct: String,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    uri: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    spoiler_text: String,
    #[serde(default)]
    visibility: String,
    #[serde(default)]
    in_reply_to_id: Option<String>,
    account: StatusAccount,
    #[serde(default)]
    reblog: Option<Box<Status>>,
    #[serde(default)]
    media_attachments: Vec<Attachment>,
}

/// `@user@instance` / `user@instance` → (user, instance).
pub fn split_handle(handle: &str) -> FetchResult<(String, String)> {
    let h = handle.trim().trim_start_matches('@');
    match h.split_once('@') {
        Some((user, instance)) if !user.is_empty() && !instance.is_empty() => {
            Ok((user.to_string(), instance.to_string()))
        }
        _ => Err(FetchError::Malformed(format!(
            "federated handle `{handle}` must look like user@instance"
        ))),
    }
}

fn attachment(a: Attachment) -> Option<MediaAttachment> {
    let kind = match a.kind.as_str() {
        "image" => MediaKind::Image,
        "video" | "gifv" => MediaKind::Video,
        _ => MediaKind::Link,
    };
    Some(MediaAttachment {
        kind,
        url: a.url?,
        thumbnail: a.preview_url,
        caption: a.description.filter(|d| !d.trim().is_empty()),
    })
}

fn status_item(mut outer: Status, now: DateTime<Utc>) -> RawItem {
    let reposted_by = outer.account.acct.clone();
    let (status, repost_of) = match outer.reblog.take() {
        Some(inner) => {
            let ctx = RepostContext {
                original_author: inner.account.acct.clone(),
                reposted_by,
            };
            (*inner, Some(ctx))
        }
        None => (outer, None),
    };

    let body = clean_text(&status.content);
    let media: Vec<MediaAttachment> = status
        .media_attachments
        .into_iter()
        .filter_map(attachment)
        .collect();
    let spoiler = clean_text(&status.spoiler_text);
    let title = if !spoiler.is_empty() {
        spoiler
    } else if !body.is_empty() {
        truncate_title(&body, 200)
    } else {
        media_placeholder(&media).to_string()
    };

    let raw_date = status.created_at.as_deref();
    let parsed = raw_date
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc));

    let mut item = RawItem::new(title, body, now);
    item.timestamp = clamp_timestamp(parsed, raw_date, now, &mut item.diagnostics);
    item.permalink = status.url.or_else(|| Some(status.uri.clone()));
    item.source_id = Some(status.uri);
    item.media = media;
    item.reply_to = status.in_reply_to_id.map(|id| ReplyContext {
        target: Some(id),
        ..ReplyContext::default()
    });
    item.repost_of = repost_of;
    item
}

/// Parse an account statuses response; only public posts are kept.
pub fn parse_statuses(json: &str, now: DateTime<Utc>) -> FetchResult<Vec<RawItem>> {
    let statuses: Vec<Value> =
        serde_json::from_str(json).map_err(|e| FetchError::Malformed(e.to_string()))?;
    Ok(statuses
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<Status>(v) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::debug!(target: "ingest", error = %e, "dropping malformed status");
                None
            }
        })
        .filter(|s| s.visibility == "public")
        .map(|s| status_item(s, now))
        .collect())
}

pub struct FederatedTimelineAdapter {
    client: reqwest::Client,
    scheme: String,
}

impl FederatedTimelineAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            scheme: "https".to_string(),
        }
    }

    /// Plain-HTTP instances (local test servers).
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }
}

#[async_trait]
impl SourceProvider for FederatedTimelineAdapter {
    async fn fetch(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>> {
        let (user, instance) = split_handle(&publisher.handle)?;
        let base = format!("{}://{}/api/v1", self.scheme, instance);

        let resp = self
            .client
            .get(format!("{base}/accounts/lookup"))
            .query(&[("acct", user.as_str())])
            .send()
            .await?;
        let account: Account = http::check_status(resp, &publisher.handle)?
            .json()
            .await?;

        let resp = self
            .client
            .get(format!("{base}/accounts/{}/statuses", account.id))
            .query(&[("limit", STATUS_LIMIT)])
            .send()
            .await?;
        let body = http::check_status(resp, &publisher.handle)?.text().await?;
        parse_statuses(&body, Utc::now())
    }

    fn name(&self) -> &'static str {
        "federated_timeline"
    }
}
