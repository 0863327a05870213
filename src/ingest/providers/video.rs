// src/ingest/providers/video.rs
//! Channel video feeds (Atom with `yt:` and `media:` extensions).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::ingest::error::{FetchError, FetchResult};
use crate::ingest::types::{MediaAttachment, MediaKind, Publisher, RawItem, SourceProvider};
use crate::ingest::{clamp_timestamp, clean_text, http};

const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml?channel_id=";

#[derive(Debug, Default)]
struct EntryDraft {
    video_id: Option<String>,
    title: String,
    link: Option<String>,
    published: Option<String>,
    description: String,
    thumbnail: Option<String>,
    duration_secs: Option<u64>,
}

/// `M:SS`, or `H:MM:SS` past the hour.
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn on_element(name: &str, e: &BytesStart<'_>, draft: &mut EntryDraft) {
    match name {
        "link" => {
            let rel = attr(e, "rel");
            if matches!(rel.as_deref(), None | Some("alternate")) && draft.link.is_none() {
                draft.link = attr(e, "href");
            }
        }
        "media:thumbnail" => {
            if draft.thumbnail.is_none() {
                draft.thumbnail = attr(e, "url");
            }
        }
        "yt:duration" => {
            if let Some(s) = attr(e, "seconds").and_then(|v| v.parse().ok()) {
                draft.duration_secs = Some(s);
            }
        }
        "media:content" => {
            if draft.duration_secs.is_none() {
                draft.duration_secs = attr(e, "duration").and_then(|v| v.parse().ok());
            }
        }
        _ => {}
    }
}

fn on_text(field: &str, text: &str, draft: &mut EntryDraft) {
    match field {
        "yt:videoId" => draft.video_id = Some(text.trim().to_string()),
        "title" => draft.title.push_str(text),
        "published" => draft.published = Some(text.trim().to_string()),
        "media:description" => draft.description.push_str(text),
        _ => {}
    }
}

/// `None` for entries without a video id.
fn finish(draft: EntryDraft, now: DateTime<Utc>) -> Option<RawItem> {
    let id = draft.video_id.clone().filter(|id| !id.is_empty())?;
    let url = draft
        .link
        .clone()
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));
    let thumbnail = draft
        .thumbnail
        .or_else(|| Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")));

    let mut body = clean_text(&draft.description);
    if let Some(secs) = draft.duration_secs {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(&format!("Duration: {}", format_duration(secs)));
    }
    let title = match clean_text(&draft.title) {
        t if t.is_empty() => "[Video]".to_string(),
        t => t,
    };

    let parsed = draft
        .published
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc));

    let mut item = RawItem::new(title, body, now);
    item.timestamp = clamp_timestamp(parsed, draft.published.as_deref(), now, &mut item.diagnostics);
    item.source_id = Some(format!("yt:video:{id}"));
    item.permalink = Some(url.clone());
    item.media = vec![MediaAttachment {
        kind: MediaKind::Video,
        url,
        thumbnail,
        caption: None,
    }];
    Some(item)
}

/// Parse a video feed. A structural error part-way keeps the entries
/// completed before it; an error before any entry is `Malformed`.
pub fn parse_video_feed(xml: &str, now: DateTime<Utc>) -> FetchResult<Vec<RawItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut draft: Option<EntryDraft> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "entry" {
                    draft = Some(EntryDraft::default());
                } else if let Some(d) = draft.as_mut() {
                    on_element(&name, &e, d);
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if let Some(d) = draft.as_mut() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    on_element(&name, &e, d);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(d), Some(field)) = (draft.as_mut(), stack.last()) {
                    match t.unescape() {
                        Ok(text) => on_text(field, &text, d),
                        Err(e) => {
                            tracing::debug!(target: "ingest", field = %field, error = %e, "skipping unreadable text")
                        }
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(d), Some(field)) = (draft.as_mut(), stack.last()) {
                    on_text(field, &String::from_utf8_lossy(&c.into_inner()), d);
                }
            }
            Ok(Event::End(e)) => {
                stack.pop();
                if e.name().as_ref() == b"entry" {
                    if let Some(item) = draft.take().and_then(|d| finish(d, now)) {
                        out.push(item);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                if out.is_empty() {
                    return Err(FetchError::Malformed(format!(
                        "video feed at byte {}: {e}",
                        reader.buffer_position()
                    )));
                }
                tracing::debug!(
                    target: "ingest",
                    kept = out.len(),
                    error = %e,
                    "video feed truncated by parse error"
                );
                break;
            }
            _ => {}
        }
    }
    Ok(out)
}

pub struct VideoFeedAdapter {
    client: reqwest::Client,
}

impl VideoFeedAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Full feed URL, or a bare channel id.
pub fn feed_url(handle: &str) -> String {
    let h = handle.trim();
    if h.starts_with("http://") || h.starts_with("https://") {
        h.to_string()
    } else {
        format!("{FEED_BASE}{h}")
    }
}

#[async_trait]
impl SourceProvider for VideoFeedAdapter {
    async fn fetch(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>> {
        let body = http::get_text(&self.client, &feed_url(&publisher.handle)).await?;
        parse_video_feed(&body, Utc::now())
    }

    fn name(&self) -> &'static str {
        "video_feed"
    }
}
