//! # Regions
//! The fixed set of geopolitical buckets and the classifier's output types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the six real regions an item can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Us,
    Europe,
    MiddleEast,
    AsiaPacific,
    LatinAmerica,
    Africa,
}

impl Region {
    pub const ALL: [Region; 6] = [
        Region::Us,
        Region::Europe,
        Region::MiddleEast,
        Region::AsiaPacific,
        Region::LatinAmerica,
        Region::Africa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Europe => "europe",
            Region::MiddleEast => "middle_east",
            Region::AsiaPacific => "asia_pacific",
            Region::LatinAmerica => "latin_america",
            Region::Africa => "africa",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == key)
            .ok_or_else(|| anyhow::anyhow!("unknown region `{s}`"))
    }
}

/// Strength label derived from a region's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Pattern tier; each hit adds the tier weight to the region score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn weight(&self) -> u32 {
        match self {
            Tier::High => 3,
            Tier::Medium => 2,
            Tier::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

/// Score of one region against one text. Lives only for one classification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionMatch {
    pub region: Region,
    pub score: u32,
    /// Deduplicated matched surface strings, in match order.
    pub matched: Vec<String>,
    pub confidence: Confidence,
}

impl RegionMatch {
    /// Eligible to win resolution.
    pub fn is_eligible(&self) -> bool {
        self.score >= 3 || self.confidence == Confidence::High
    }
}

/// Final decision attached to a normalized item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionAssignment {
    /// `None` means unassigned.
    pub region: Option<Region>,
    /// True when the publisher default was used because nothing cleared the bar.
    pub fell_back: bool,
}

impl RegionAssignment {
    pub fn unassigned() -> Self {
        Self {
            region: None,
            fell_back: false,
        }
    }
}
