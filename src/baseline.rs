//! # Activity Baseline
//! Per-region "busier than usual" signal over the last six hours.
//!
//! Expected volume is the flat six-hour share of the assigned publishers'
//! `posts_per_day`, scaled by a UTC time-of-day slot. Nothing is stored;
//! windows are recomputed from the item stream on every call.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;

use crate::ingest::types::{NormalizedItem, Publisher};
use crate::region::Region;

/// Multipliers for UTC hours 0–5, 6–11, 12–17, 18–23. Sums to 4.0.
pub const SLOT_MULTIPLIERS: [f64; 4] = [0.6, 1.1, 1.5, 0.8];

pub const WINDOW_HOURS: i64 = 6;

const CRITICAL_MULTIPLIER: f64 = 5.0;
const CRITICAL_MIN_COUNT: usize = 50;
const ELEVATED_MULTIPLIER: f64 = 2.5;
const ELEVATED_MIN_COUNT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityTier {
    Critical,
    Elevated,
    Normal,
}

impl ActivityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityTier::Critical => "critical",
            ActivityTier::Elevated => "elevated",
            ActivityTier::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityWindow {
    pub region: Region,
    pub count: usize,
    pub expected: f64,
    pub multiplier: f64,
    pub percent_change: i64,
    pub tier: ActivityTier,
}

/// Flat six-hour expectation for `region`: Σ posts_per_day / 4 over the
/// publishers whose default region it is.
pub fn flat_baseline(publishers: &[Arc<Publisher>], region: Region) -> f64 {
    publishers
        .iter()
        .filter(|p| p.default_region == Some(region))
        .map(|p| p.posts_per_day)
        .sum::<f64>()
        / 4.0
}

pub fn slot_multiplier(hour: u32) -> f64 {
    SLOT_MULTIPLIERS[(hour as usize / 6).min(3)]
}

/// Both a multiplier and an absolute count are required.
pub fn tier_for(multiplier: f64, count: usize, insufficient: bool) -> ActivityTier {
    if insufficient {
        ActivityTier::Normal
    } else if multiplier >= CRITICAL_MULTIPLIER && count >= CRITICAL_MIN_COUNT {
        ActivityTier::Critical
    } else if multiplier >= ELEVATED_MULTIPLIER && count >= ELEVATED_MIN_COUNT {
        ActivityTier::Elevated
    } else {
        ActivityTier::Normal
    }
}

pub fn evaluate_window(
    region: Region,
    count: usize,
    flat: f64,
    slot: f64,
    insufficient: bool,
) -> ActivityWindow {
    let expected = flat * slot;
    if insufficient || expected <= 0.0 {
        return ActivityWindow {
            region,
            count,
            expected: expected.max(0.0),
            multiplier: 0.0,
            percent_change: 0,
            tier: ActivityTier::Normal,
        };
    }
    let multiplier = count as f64 / expected;
    ActivityWindow {
        region,
        count,
        expected,
        multiplier,
        percent_change: ((multiplier - 1.0) * 100.0).round() as i64,
        tier: tier_for(multiplier, count, false),
    }
}

/// One window per region, in [`Region::ALL`] order.
pub fn compute_activity(
    items: &[NormalizedItem],
    publishers: &[Arc<Publisher>],
    now: DateTime<Utc>,
    insufficient: &[Region],
) -> Vec<ActivityWindow> {
    let since = now - ChronoDuration::hours(WINDOW_HOURS);
    let slot = slot_multiplier(now.hour());

    Region::ALL
        .iter()
        .map(|&region| {
            let count = items
                .iter()
                .filter(|it| it.region.region == Some(region))
                .filter(|it| it.timestamp > since && it.timestamp <= now)
                .count();
            evaluate_window(
                region,
                count,
                flat_baseline(publishers, region),
                slot,
                insufficient.contains(&region),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Protocol;
    use crate::region::RegionAssignment;
    use chrono::TimeZone;

    #[test]
    fn slots_cover_the_day() {
        assert_eq!(slot_multiplier(0), 0.6);
        assert_eq!(slot_multiplier(11), 1.1);
        assert_eq!(slot_multiplier(12), 1.5);
        assert_eq!(slot_multiplier(23), 0.8);
        assert!((SLOT_MULTIPLIERS.iter().sum::<f64>() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn tier_examples() {
        // flat 20/3 at slot 1.5 → expected 10
        let flat = 20.0 / 3.0;
        let w = evaluate_window(Region::MiddleEast, 60, flat, 1.5, false);
        assert!((w.multiplier - 6.0).abs() < 1e-9);
        assert_eq!(w.percent_change, 500);
        assert_eq!(w.tier, ActivityTier::Critical);

        let w = evaluate_window(Region::MiddleEast, 40, flat, 1.5, false);
        assert_eq!(w.tier, ActivityTier::Elevated);

        // high multiplier, too few posts
        let w = evaluate_window(Region::Africa, 20, 1.0, 1.5, false);
        assert!(w.multiplier > 10.0);
        assert_eq!(w.tier, ActivityTier::Normal);
    }

    #[test]
    fn insufficient_and_zero_expected_are_normal() {
        let w = evaluate_window(Region::Africa, 500, 10.0, 1.5, true);
        assert_eq!((w.tier, w.multiplier), (ActivityTier::Normal, 0.0));
        let w = evaluate_window(Region::Us, 500, 0.0, 1.5, false);
        assert_eq!((w.tier, w.multiplier), (ActivityTier::Normal, 0.0));
    }

    fn publisher(id: &str, region: Region, per_day: f64) -> Arc<Publisher> {
        Arc::new(Publisher {
            id: id.into(),
            name: id.into(),
            protocol: Protocol::Syndication,
            handle: format!("https://{id}.example/feed"),
            default_region: Some(region),
            single_region: false,
            tier: 2,
            confidence: 0.7,
            posts_per_day: per_day,
        })
    }

    #[test]
    fn compute_counts_only_the_window() {
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 14, 0, 0).unwrap();
        let p = publisher("me", Region::MiddleEast, 20.0);
        let pubs = vec![p.clone(), publisher("eu", Region::Europe, 8.0)];

        let mk = |hours_ago: i64, region: Option<Region>| NormalizedItem {
            id: format!("{hours_ago}-{region:?}"),
            title: String::new(),
            body: String::new(),
            publisher: p.clone(),
            timestamp: now - ChronoDuration::hours(hours_ago),
            permalink: None,
            media: Vec::new(),
            reply_to: None,
            repost_of: None,
            region: RegionAssignment {
                region,
                fell_back: false,
            },
        };
        let items = vec![
            mk(1, Some(Region::MiddleEast)),
            mk(5, Some(Region::MiddleEast)),
            mk(7, Some(Region::MiddleEast)),
            mk(2, None),
        ];
        let windows = compute_activity(&items, &pubs, now, &[]);
        assert_eq!(windows.len(), 6);

        let me = windows.iter().find(|w| w.region == Region::MiddleEast).unwrap();
        assert_eq!(me.count, 2);
        assert!((me.expected - 7.5).abs() < 1e-9);

        let eu = windows.iter().find(|w| w.region == Region::Europe).unwrap();
        assert_eq!(eu.count, 0);
        assert_eq!(eu.percent_change, -100);
    }
}
