// src/ingest/providers/syndication.rs
//! Generic RSS (`<item>`) and Atom (`<entry>`) feeds.
//!
//! Blocks are cut out by pattern rather than with a strict XML parser so a
//! single malformed item is dropped without losing the rest of the feed.

use std::borrow::Cow;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::error::{FetchError, FetchResult};
use crate::ingest::types::{MediaAttachment, MediaKind, Publisher, RawItem, SourceProvider};
use crate::ingest::{clamp_timestamp, clean_text, http, truncate_title};

static RE_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item>").unwrap());
static RE_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry>").unwrap());
static RE_CDATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());
static RE_LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b([^>]*)>").unwrap());
static RE_MEDIA_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(enclosure|media:content|media:thumbnail)\b([^>]*)>").unwrap());

const FIELD_TAGS: &[&str] = &[
    "title",
    "link",
    "description",
    "summary",
    "content",
    "content:encoded",
    "guid",
    "id",
    "pubDate",
    "published",
    "updated",
    "dc:date",
];

// `(?:\s[^>]*)?` rather than `\b` so `content` does not swallow `content:encoded`.
static RE_FIELDS: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    FIELD_TAGS
        .iter()
        .map(|t| {
            let esc = regex::escape(t);
            let re = Regex::new(&format!(r"(?is)<{esc}(?:\s[^>]*)?>(.*?)</{esc}>")).unwrap();
            (*t, re)
        })
        .collect()
});

/// Zone abbreviations seen in the wild, tried longest-first so `AEDT` is
/// never read as `EDT`.
static ZONE_ABBREVIATIONS: Lazy<Vec<(&'static str, i32)>> = Lazy::new(|| {
    let mut v = vec![
        ("UT", 0),
        ("UTC", 0),
        ("GMT", 0),
        ("EST", -5 * 3600),
        ("EDT", -4 * 3600),
        ("CST", -6 * 3600),
        ("CDT", -5 * 3600),
        ("MST", -7 * 3600),
        ("MDT", -6 * 3600),
        ("PST", -8 * 3600),
        ("PDT", -7 * 3600),
        ("BST", 3600),
        ("CET", 3600),
        ("CEST", 2 * 3600),
        ("IST", 5 * 3600 + 1800),
        ("JST", 9 * 3600),
        ("AEST", 10 * 3600),
        ("AEDT", 11 * 3600),
    ];
    v.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    v
});

const OFFSET_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
];

/// Zone-less forms, read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M:%S",
];

/// Best-effort parse of a feed date in any of the known formats.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        if let Some(out) = Utc.timestamp_opt(dt.unix_timestamp(), 0).single() {
            return Some(out);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_with_zone_abbreviation(s) {
        return Some(dt);
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(n.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

fn parse_with_zone_abbreviation(s: &str) -> Option<DateTime<Utc>> {
    for (abbr, secs) in ZONE_ABBREVIATIONS.iter() {
        let Some(head) = s.strip_suffix(*abbr) else {
            continue;
        };
        if !head.ends_with(char::is_whitespace) {
            continue;
        }
        let head = head.trim_end();
        let offset = FixedOffset::east_opt(*secs)?;
        for fmt in NAIVE_FORMATS {
            if let Ok(n) = NaiveDateTime::parse_from_str(head, fmt) {
                return offset
                    .from_local_datetime(&n)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc));
            }
        }
        return None;
    }
    None
}

fn field_raw<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    RE_FIELDS
        .get(tag)
        .and_then(|re| re.captures(block))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// CDATA is literal markup; everything else is XML-escaped first.
fn field_text(raw: &str) -> String {
    let unwrapped: Cow<'_, str> = if raw.contains("<![CDATA[") {
        RE_CDATA.replace_all(raw, "$1")
    } else {
        html_escape::decode_html_entities(raw)
    };
    clean_text(&unwrapped)
}

fn first_text(block: &str, tags: &[&str]) -> Option<String> {
    tags.iter()
        .filter_map(|t| field_raw(block, t))
        .map(field_text)
        .find(|s| !s.is_empty())
}

static RE_ATTRS: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    ["href", "rel", "url", "type", "medium"]
        .iter()
        .map(|a| {
            let re = Regex::new(&format!(r#"(?i)\b{a}\s*=\s*["']([^"']*)["']"#)).unwrap();
            (*a, re)
        })
        .collect()
});

fn attr_value(attrs: &str, name: &str) -> Option<String> {
    RE_ATTRS
        .get(name)?
        .captures(attrs)
        .and_then(|c| c.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
}

/// RSS `<link>text</link>` or Atom `<link rel="alternate" href=".."/>`.
fn item_link(block: &str) -> Option<String> {
    if let Some(t) = field_raw(block, "link").map(field_text).filter(|s| !s.is_empty()) {
        return Some(t);
    }
    RE_LINK_TAG
        .captures_iter(block)
        .filter_map(|c| {
            let attrs = c.get(1)?.as_str();
            let href = attr_value(attrs, "href")?;
            let rel = attr_value(attrs, "rel");
            Some((rel, href))
        })
        .find(|(rel, _)| matches!(rel.as_deref(), None | Some("alternate")))
        .map(|(_, href)| href)
}

fn item_media(block: &str) -> Vec<MediaAttachment> {
    let mut media: Vec<MediaAttachment> = Vec::new();
    let mut thumbnail: Option<String> = None;
    for c in RE_MEDIA_TAG.captures_iter(block) {
        let tag = c.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        let attrs = c.get(2).map(|m| m.as_str()).unwrap_or_default();
        let Some(url) = attr_value(attrs, "url") else {
            continue;
        };
        if tag == "media:thumbnail" {
            thumbnail.get_or_insert(url);
            continue;
        }
        let mime = attr_value(attrs, "type")
            .or_else(|| attr_value(attrs, "medium"))
            .unwrap_or_default()
            .to_ascii_lowercase();
        let kind = if mime.starts_with("video") {
            MediaKind::Video
        } else if mime.starts_with("image") {
            MediaKind::Image
        } else {
            continue;
        };
        if !media.iter().any(|m| m.url == url) {
            media.push(MediaAttachment {
                kind,
                url,
                thumbnail: None,
                caption: None,
            });
        }
    }
    if let Some(t) = thumbnail {
        match media.first_mut() {
            Some(first) => first.thumbnail = Some(t),
            None => media.push(MediaAttachment {
                kind: MediaKind::Image,
                url: t,
                thumbnail: None,
                caption: None,
            }),
        }
    }
    media
}

fn parse_block(block: &str, now: DateTime<Utc>) -> Option<RawItem> {
    let title = first_text(block, &["title"]).unwrap_or_default();
    let link = item_link(block);
    if title.is_empty() && link.is_none() {
        return None;
    }
    let body = first_text(block, &["content:encoded", "description", "summary", "content"])
        .unwrap_or_default();

    let raw_date = ["pubDate", "published", "updated", "dc:date"]
        .iter()
        .find_map(|t| field_raw(block, t))
        .map(field_text);

    let mut item = RawItem::new(
        if title.is_empty() {
            truncate_title(&body, 120)
        } else {
            title
        },
        body,
        now,
    );
    item.timestamp = clamp_timestamp(
        raw_date.as_deref().and_then(parse_feed_date),
        raw_date.as_deref(),
        now,
        &mut item.diagnostics,
    );
    item.source_id = first_text(block, &["guid", "id"]);
    item.permalink = link;
    item.media = item_media(block);
    Some(item)
}

/// Parse every `<item>` (or, failing that, `<entry>`) block in `xml`.
pub fn parse_feed(xml: &str, now: DateTime<Utc>) -> Vec<RawItem> {
    let blocks: Vec<&str> = {
        let items: Vec<&str> = RE_ITEM
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if items.is_empty() {
            RE_ENTRY
                .captures_iter(xml)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect()
        } else {
            items
        }
    };

    let total = blocks.len();
    let out: Vec<RawItem> = blocks.into_iter().filter_map(|b| parse_block(b, now)).collect();
    if out.len() < total {
        tracing::debug!(
            target: "ingest",
            dropped = total - out.len(),
            "dropped malformed feed items"
        );
    }
    out
}

pub struct SyndicationAdapter {
    client: reqwest::Client,
}

impl SyndicationAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceProvider for SyndicationAdapter {
    async fn fetch(&self, publisher: &Publisher) -> FetchResult<Vec<RawItem>> {
        let body = http::get_text(&self.client, &publisher.handle).await?;
        let items = parse_feed(&body, Utc::now());
        if items.is_empty() {
            let head = body.chars().take(512).collect::<String>().to_ascii_lowercase();
            if !(head.contains("<rss") || head.contains("<feed") || head.contains("<rdf")) {
                return Err(FetchError::Malformed(format!(
                    "{} is not a syndication feed",
                    publisher.handle
                )));
            }
        }
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "syndication"
    }
}
