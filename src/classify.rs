// src/classify.rs
//! Region classifier: declarative keyword tables, regex compilation, tiered
//! scoring and tie-broken resolution.
//!
//! The classifier is a pure function of `(tables, text, default region)`.
//! Nothing is cached between calls, so identical text from two publishers
//! always classifies identically.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::region::{Confidence, Region, RegionAssignment, RegionMatch, Tier};

/// Tables compiled into the binary; `regions_path` in config overrides them.
pub const BUILTIN_REGIONS_TOML: &str = include_str!("../config/regions.toml");

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct RegionTablesRoot {
    pub regions: Vec<RegionPatternsCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionPatternsCfg {
    pub id: String,
    #[serde(default)]
    pub high: Vec<String>,
    #[serde(default)]
    pub medium: Vec<String>,
    #[serde(default)]
    pub low: Vec<String>,
}

/* ----------------------------
Compiled tables
---------------------------- */

#[derive(Debug)]
struct CompiledPattern {
    tier: Tier,
    re: Regex,
}

#[derive(Debug)]
struct CompiledRegion {
    region: Region,
    /// Ordered high → medium → low.
    patterns: Vec<CompiledPattern>,
}

/// Holds the compiled keyword tables for every region.
#[derive(Debug)]
pub struct RegionClassifier {
    regions: Vec<CompiledRegion>,
}

impl RegionClassifier {
    /// Classifier over the embedded `config/regions.toml`.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_REGIONS_TOML).context("compiling builtin region tables")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading region tables from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("compiling region tables from {}", path.display()))
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let cfg: RegionTablesRoot = toml::from_str(toml_str)?;

        let regions = cfg
            .regions
            .iter()
            .map(|rc| {
                let region: Region = rc.id.parse()?;
                let mut patterns = Vec::with_capacity(rc.high.len() + rc.medium.len() + rc.low.len());
                for (tier, list) in [
                    (Tier::High, &rc.high),
                    (Tier::Medium, &rc.medium),
                    (Tier::Low, &rc.low),
                ] {
                    for p in list {
                        let re = Regex::new(p).map_err(|e| {
                            anyhow::anyhow!(
                                "region `{}` {} pattern `{}` regex error: {}",
                                rc.id,
                                tier.as_str(),
                                p,
                                e
                            )
                        })?;
                        patterns.push(CompiledPattern { tier, re });
                    }
                }
                Ok(CompiledRegion { region, patterns })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for cr in &regions {
            if !seen.insert(cr.region) {
                bail!("duplicate region id `{}`", cr.region.as_str());
            }
        }

        Ok(Self { regions })
    }

    /// Score one region. Each matching pattern counts once with its tier weight.
    fn score_region(cr: &CompiledRegion, text: &str) -> RegionMatch {
        let mut score = 0u32;
        let mut matched: Vec<String> = Vec::new();
        let mut high_hit = false;

        for p in &cr.patterns {
            if let Some(m) = p.re.find(text) {
                score += p.tier.weight();
                if p.tier == Tier::High {
                    high_hit = true;
                }
                let s = m.as_str().to_string();
                if !matched.contains(&s) {
                    matched.push(s);
                }
            }
        }

        RegionMatch {
            region: cr.region,
            score,
            matched,
            confidence: confidence_for(score, high_hit),
        }
    }

    /// All regions with a nonzero score, ranked by score (ties keep table order).
    pub fn score(&self, text: &str) -> Vec<RegionMatch> {
        let mut ranked: Vec<RegionMatch> = self
            .regions
            .iter()
            .map(|cr| Self::score_region(cr, text))
            .filter(|m| m.score > 0)
            .collect();
        // stable: equal scores stay in table order
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    /// Score and resolve `text` for a publisher whose declared default is `default`.
    pub fn classify(&self, text: &str, default: Option<Region>) -> RegionAssignment {
        let ranked = self.score(text);
        let out = resolve(&ranked, default);
        debug!(
            target: "classify",
            id = %crate::ingest::content_id("classify", text),
            region = ?out.region,
            fell_back = out.fell_back,
            candidates = ranked.len(),
        );
        out
    }
}

/// `high` if score ≥ 6 or any high-tier hit, `medium` if score ≥ 3, else `low`.
pub fn confidence_for(score: u32, high_hit: bool) -> Confidence {
    if score >= 6 || high_hit {
        Confidence::High
    } else if score >= 3 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Resolve ranked matches into an assignment.
///
/// When the top eligible region is the home (default) region, any eligible
/// foreign region scoring at least as much takes precedence: home only wins
/// when it strictly dominates.
pub fn resolve(ranked: &[RegionMatch], default: Option<Region>) -> RegionAssignment {
    let mut eligible = ranked.iter().filter(|m| m.is_eligible());

    let Some(top) = eligible.next() else {
        return match default {
            Some(r) => RegionAssignment {
                region: Some(r),
                fell_back: true,
            },
            None => RegionAssignment::unassigned(),
        };
    };

    if Some(top.region) == default {
        if let Some(foreign) = eligible.find(|m| m.region != top.region && m.score >= top.score) {
            return RegionAssignment {
                region: Some(foreign.region),
                fell_back: false,
            };
        }
    }

    RegionAssignment {
        region: Some(top.region),
        fell_back: false,
    }
}

/* ----------------------------
Tests
---------------------------- */
