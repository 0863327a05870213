//! Most frequent matched keyword surfaces across a batch.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::classify::RegionClassifier;
use crate::ingest::types::NormalizedItem;
use crate::region::Region;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendingTerm {
    /// First-seen surface form.
    pub term: String,
    /// Items mentioning the term (once per item).
    pub count: usize,
    pub regions: Vec<Region>,
}

#[derive(Default)]
struct Tally {
    term: String,
    count: usize,
    regions: BTreeSet<Region>,
}

/// Count → term ascending, truncated to `limit`.
pub fn trending_terms(
    classifier: &RegionClassifier,
    items: &[NormalizedItem],
    limit: usize,
) -> Vec<TrendingTerm> {
    let mut tallies: HashMap<String, Tally> = HashMap::new();

    for item in items {
        let mut seen: HashSet<String> = HashSet::new();
        for m in classifier.score(&item.text()) {
            for surface in &m.matched {
                let key = surface.to_lowercase();
                let t = tallies.entry(key.clone()).or_insert_with(|| Tally {
                    term: surface.clone(),
                    ..Tally::default()
                });
                t.regions.insert(m.region);
                if seen.insert(key) {
                    t.count += 1;
                }
            }
        }
    }

    let mut out: Vec<TrendingTerm> = tallies
        .into_values()
        .map(|t| TrendingTerm {
            term: t.term,
            count: t.count,
            regions: t.regions.into_iter().collect(),
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
    out.truncate(limit);
    out
}
