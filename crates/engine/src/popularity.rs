//! Popularity scorer for cold-start ranking.
//!
//! Scores shrink low-volume items toward the global mean so a single 5-star
//! rating never tops the list:
//!
//! ```text
//! weighted_score = (v / (v + m)) * R + (m / (v + m)) * C
//! ```
//!
//! where `v` is the item's rating count, `R` its mean rating, `C` the global
//! mean across all ratings, and `m` the minimum-votes threshold.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Rating;

/// How the minimum-votes threshold `m` is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MinVotes {
    /// A fixed constant.
    Fixed(u32),
    /// A percentile (in `[0, 1]`) of the per-item rating-count distribution.
    CountPercentile(f64),
}

impl Default for MinVotes {
    fn default() -> Self {
        MinVotes::CountPercentile(0.75)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopularityConfig {
    pub min_votes: MinVotes,
}

/// Popularity entry for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityScore {
    pub item_id: String,
    pub weighted_score: f32,
    pub rating_count: u32,
    pub mean_score: f32,
}

/// Items ranked descending by weighted score. Recomputed each training
/// cycle from the full rating table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopularityTable {
    ranked: Vec<PopularityScore>,
}

impl PopularityTable {
    /// Builds the ranking. Duplicate `(user, item)` pairs resolve with the
    /// same last-write-wins policy as the rating matrix so both views of the
    /// table agree. Empty input yields an empty table.
    pub fn build(ratings: &[Rating], config: &PopularityConfig) -> Self {
        let mut cells: HashMap<(&str, &str), (f32, i64)> = HashMap::new();
        for r in ratings {
            match cells.get(&(r.user_id.as_str(), r.item_id.as_str())) {
                Some(&(_, existing_ts)) if r.timestamp < existing_ts => {}
                _ => {
                    cells.insert((r.user_id.as_str(), r.item_id.as_str()), (r.score, r.timestamp));
                }
            }
        }

        if cells.is_empty() {
            return Self::default();
        }

        let mut per_item: HashMap<&str, (u32, f64)> = HashMap::new();
        let mut total = 0.0f64;
        for (&(_, item_id), &(score, _)) in &cells {
            let entry = per_item.entry(item_id).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += f64::from(score);
            total += f64::from(score);
        }

        let global_mean = total / cells.len() as f64;
        let m = f64::from(Self::min_votes(&per_item, config.min_votes));

        let mut ranked: Vec<PopularityScore> = per_item
            .into_iter()
            .map(|(item_id, (count, sum))| {
                let v = f64::from(count);
                let mean = sum / v;
                let weighted = if v + m > 0.0 {
                    (v / (v + m)) * mean + (m / (v + m)) * global_mean
                } else {
                    mean
                };
                PopularityScore {
                    item_id: item_id.to_string(),
                    weighted_score: weighted as f32,
                    rating_count: count,
                    mean_score: mean as f32,
                }
            })
            .collect();

        // Ties break by volume, then item id, for full determinism.
        ranked.sort_unstable_by(|a, b| {
            b.weighted_score
                .total_cmp(&a.weighted_score)
                .then(b.rating_count.cmp(&a.rating_count))
                .then(a.item_id.cmp(&b.item_id))
        });

        Self { ranked }
    }

    fn min_votes(per_item: &HashMap<&str, (u32, f64)>, policy: MinVotes) -> u32 {
        match policy {
            MinVotes::Fixed(m) => m,
            MinVotes::CountPercentile(p) => {
                let mut counts: Vec<u32> = per_item.values().map(|&(v, _)| v).collect();
                counts.sort_unstable();
                let p = p.clamp(0.0, 1.0);
                let pos = (p * (counts.len() - 1) as f64).round() as usize;
                counts[pos]
            }
        }
    }

    pub fn top_n(&self, n: usize) -> &[PopularityScore] {
        &self.ranked[..n.min(self.ranked.len())]
    }

    pub fn score_for(&self, item_id: &str) -> Option<&PopularityScore> {
        self.ranked.iter().find(|s| s.item_id == item_id)
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}
