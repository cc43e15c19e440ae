//! Sparse rating matrix and the bijective id ↔ index maps.
//!
//! Absent cells are *unknown*, never zero: the factorization loss only runs
//! over observed entries, so the matrix stores an explicit presence map
//! instead of a dense zero-filled grid.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecommenderError, Result};
use crate::types::{Rating, RatingScale};

/// Bijective mapping between external string ids and dense matrix indices.
/// Indices are assigned in first-appearance order, so identical input yields
/// identical maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMap {
    ids: Vec<String>,
    indices: HashMap<String, usize>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index for `id`, inserting it if unseen.
    pub fn insert_or_get(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.indices.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.indices.insert(id.to_string(), idx);
        idx
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.indices.get(id).copied()
    }

    pub fn id_at(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Sparse user×item matrix of observed scores plus the index maps used to
/// translate external ids. Built fresh each training cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingMatrix {
    entries: HashMap<(usize, usize), f32>,
    users: IndexMap,
    items: IndexMap,
    scale: RatingScale,
}

impl RatingMatrix {
    /// Builds the matrix from an ordered rating table.
    ///
    /// Duplicate `(user, item)` pairs resolve last-write-wins ordered by
    /// timestamp; on equal timestamps the later input row wins. Fails with a
    /// data error on an empty table or any score outside `scale`.
    pub fn from_ratings(ratings: &[Rating], scale: RatingScale) -> Result<Self> {
        if ratings.is_empty() {
            return Err(RecommenderError::Data(
                "cannot build a rating matrix from an empty table".to_string(),
            ));
        }

        let mut users = IndexMap::new();
        let mut items = IndexMap::new();
        let mut cells: HashMap<(usize, usize), (f32, i64)> = HashMap::new();

        for rating in ratings {
            if !scale.contains(rating.score) {
                return Err(RecommenderError::Data(format!(
                    "score {} for ({}, {}) is outside the scale [{}, {}]",
                    rating.score,
                    rating.user_id,
                    rating.item_id,
                    scale.min_score,
                    scale.max_score
                )));
            }

            let row = users.insert_or_get(&rating.user_id);
            let col = items.insert_or_get(&rating.item_id);

            match cells.get(&(row, col)) {
                Some(&(_, existing_ts)) if rating.timestamp < existing_ts => {}
                _ => {
                    cells.insert((row, col), (rating.score, rating.timestamp));
                }
            }
        }

        let entries = cells
            .into_iter()
            .map(|(cell, (score, _))| (cell, score))
            .collect();

        Ok(Self {
            entries,
            users,
            items,
            scale,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.entries.get(&(row, col)).copied()
    }

    pub fn n_users(&self) -> usize {
        self.users.len()
    }

    pub fn n_items(&self) -> usize {
        self.items.len()
    }

    pub fn n_observed(&self) -> usize {
        self.entries.len()
    }

    pub fn users(&self) -> &IndexMap {
        &self.users
    }

    pub fn items(&self) -> &IndexMap {
        &self.items
    }

    pub fn scale(&self) -> RatingScale {
        self.scale
    }

    pub fn entries(&self) -> impl Iterator<Item = ((usize, usize), f32)> + '_ {
        self.entries.iter().map(|(&cell, &score)| (cell, score))
    }

    /// Mean of all observed scores.
    pub fn global_mean(&self) -> f32 {
        let sum: f64 = self.entries.values().map(|&s| f64::from(s)).sum();
        (sum / self.entries.len() as f64) as f32
    }

    /// Per-user `(item_index, score)` lists, each sorted by item index.
    /// Sorted adjacency keeps every training pass deterministic regardless
    /// of hash-map iteration order.
    pub(crate) fn user_adjacency(&self) -> Vec<Vec<(usize, f32)>> {
        let mut rows = vec![Vec::new(); self.n_users()];
        for (&(row, col), &score) in &self.entries {
            rows[row].push((col, score));
        }
        for row in &mut rows {
            row.sort_unstable_by_key(|&(col, _)| col);
        }
        rows
    }

    /// Per-item `(user_index, score)` lists, each sorted by user index.
    pub(crate) fn item_adjacency(&self) -> Vec<Vec<(usize, f32)>> {
        let mut cols = vec![Vec::new(); self.n_items()];
        for (&(row, col), &score) in &self.entries {
            cols[col].push((row, score));
        }
        for col in &mut cols {
            col.sort_unstable_by_key(|&(row, _)| row);
        }
        cols
    }

    /// Number of observed ratings per user index.
    pub fn user_rating_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_users()];
        for &(row, _) in self.entries.keys() {
            counts[row] += 1;
        }
        counts
    }
}
