use std::fs;

use chrono::{TimeZone, Utc};
use region_pulse::ingest::providers::video::parse_video_feed;
use region_pulse::ingest::types::MediaKind;

#[test]
fn video_fixture_extracts_ids_thumbnails_and_duration() {
    let xml = fs::read_to_string("tests/fixtures/video_feed.xml").expect("missing video_feed.xml");
    let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
    let items = parse_video_feed(&xml, now).unwrap();
    assert_eq!(items.len(), 2);

    let first = &items[0];
    assert_eq!(first.title, "Taiwan Strait: what the drills mean");
    assert_eq!(first.source_id.as_deref(), Some("yt:video:vid001"));
    assert_eq!(first.body, "Analysts on Beijing & the PLA.\n\nDuration: 12:34");
    assert_eq!(first.media[0].kind, MediaKind::Video);
    assert_eq!(
        first.media[0].thumbnail.as_deref(),
        Some("https://i1.ytimg.com/vi/vid001/custom.jpg")
    );
    assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2025, 9, 6, 6, 0, 0).unwrap());

    let second = &items[1];
    assert_eq!(
        second.permalink.as_deref(),
        Some("https://www.youtube.com/watch?v=vid002")
    );
    assert_eq!(
        second.media[0].thumbnail.as_deref(),
        Some("https://i.ytimg.com/vi/vid002/hqdefault.jpg")
    );
    assert!(second.body.is_empty());
}
