//! Content feature vectors and item-item similarity.
//!
//! Each item gets a fixed-length TF-IDF weighted vector over a controlled
//! vocabulary built from its categorical tags and tokenized free text.
//! Vectors are L2-normalized so cosine similarity reduces to a dot product.
//! This is the item cold-start signal: newly added items with no ratings can
//! still be scored against a user's highest-rated items.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::matrix::IndexMap;
use crate::types::ItemMetadata;

/// Immutable content index over the item catalog. Rebuilt whenever the
/// catalog changes; deterministic for identical metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentIndex {
    vocabulary: Vec<String>,
    items: IndexMap,
    /// L2-normalized feature vectors, parallel to `items`.
    vectors: Vec<Vec<f32>>,
}

impl ContentIndex {
    /// Builds vectors for the given catalog. Later duplicates of an item id
    /// replace earlier ones. An empty catalog yields an empty index.
    pub fn build(catalog: &[ItemMetadata]) -> Self {
        if catalog.is_empty() {
            return Self::default();
        }

        // Deduplicate by id, last entry wins.
        let mut latest: HashMap<&str, &ItemMetadata> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for item in catalog {
            if latest.insert(item.item_id.as_str(), item).is_none() {
                order.push(item.item_id.as_str());
            }
        }

        // Term counts per item and document frequencies.
        let mut term_counts: Vec<HashMap<String, u32>> = Vec::with_capacity(order.len());
        let mut df: HashMap<String, u32> = HashMap::new();
        let mut items = IndexMap::new();

        for id in &order {
            let item = latest[id];
            items.insert_or_get(&item.item_id);

            let mut counts: HashMap<String, u32> = HashMap::new();
            for tag in &item.tags {
                let term = tag.trim().to_lowercase();
                if !term.is_empty() {
                    *counts.entry(term).or_insert(0) += 1;
                }
            }
            if let Some(text) = &item.text {
                for token in tokenize(text) {
                    *counts.entry(token).or_insert(0) += 1;
                }
            }
            for term in counts.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            term_counts.push(counts);
        }

        // Sorted vocabulary keeps vector layout stable across rebuilds.
        let mut vocabulary: Vec<String> = df.keys().cloned().collect();
        vocabulary.sort_unstable();
        let term_slots: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(slot, term)| (term.as_str(), slot))
            .collect();

        let n_items = order.len() as f32;
        let idf: Vec<f32> = vocabulary
            .iter()
            .map(|term| (n_items / (1.0 + df[term] as f32)).ln() + 1.0)
            .collect();

        let vectors = term_counts
            .into_iter()
            .map(|counts| {
                let mut vector = vec![0.0f32; vocabulary.len()];
                for (term, count) in counts {
                    let slot = term_slots[term.as_str()];
                    vector[slot] = count as f32 * idf[slot];
                }
                let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut vector {
                        *x /= norm;
                    }
                }
                vector
            })
            .collect();

        Self {
            vocabulary,
            items,
            vectors,
        }
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.index_of(item_id).is_some()
    }

    pub fn vector(&self, item_id: &str) -> Option<&[f32]> {
        let idx = self.items.index_of(item_id)?;
        Some(&self.vectors[idx])
    }

    /// Cosine similarity between two items, `None` if either is unindexed.
    pub fn similarity(&self, a: &str, b: &str) -> Option<f32> {
        let va = self.vector(a)?;
        let vb = self.vector(b)?;
        Some(dot(va, vb))
    }

    /// The `n` most similar items to `item_id`, excluding itself, sorted
    /// descending with item-id-ascending tie-break.
    pub fn similar_items(&self, item_id: &str, n: usize) -> Vec<(String, f32)> {
        let Some(target) = self.vector(item_id) else {
            return Vec::new();
        };

        let mut scored: Vec<(String, f32)> = self
            .items
            .ids()
            .iter()
            .zip(&self.vectors)
            .filter(|(id, _)| id.as_str() != item_id)
            .map(|(id, vector)| (id.clone(), dot(target, vector)))
            .collect();

        scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(n);
        scored
    }

    pub fn item_ids(&self) -> &[String] {
        self.items.ids()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Lowercased alphanumeric tokens of a free-text field.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, tags: &[&str]) -> ItemMetadata {
        ItemMetadata::new(id, tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_empty_catalog() {
        let index = ContentIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.similar_items("x", 5).is_empty());
        assert_eq!(index.similarity("x", "y"), None);
    }

    #[test]
    fn test_identical_tags_have_unit_similarity() {
        let catalog = vec![
            item("a", &["action", "sci-fi"]),
            item("b", &["action", "sci-fi"]),
            item("c", &["romance"]),
        ];
        let index = ContentIndex::build(&catalog);

        let sim_ab = index.similarity("a", "b").unwrap();
        assert!((sim_ab - 1.0).abs() < 1e-5);

        let sim_ac = index.similarity("a", "c").unwrap();
        assert!(sim_ac.abs() < 1e-5);
    }

    #[test]
    fn test_similar_items_excludes_self_and_sorts() {
        let catalog = vec![
            item("a", &["action", "thriller"]),
            item("b", &["action", "thriller"]),
            item("c", &["action", "comedy"]),
            item("d", &["documentary"]),
        ];
        let index = ContentIndex::build(&catalog);

        let similar = index.similar_items("a", 3);
        assert_eq!(similar.len(), 3);
        assert_eq!(similar[0].0, "b");
        assert_eq!(similar[1].0, "c");
        assert!(similar.iter().all(|(id, _)| id != "a"));
        assert!(similar[0].1 > similar[1].1);
    }

    #[test]
    fn test_vocabulary_is_deterministic() {
        let catalog = vec![
            item("a", &["zebra", "apple"]),
            item("b", &["mango", "apple"]),
        ];
        let first = ContentIndex::build(&catalog);
        let second = ContentIndex::build(&catalog);
        assert_eq!(first.vocabulary, second.vocabulary);
        assert_eq!(first.vectors, second.vectors);
        assert_eq!(first.vocabulary, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_free_text_tokens_contribute() {
        let catalog = vec![
            item("a", &["drama"]).with_text("A quiet family story"),
            item("b", &["drama"]).with_text("A quiet family story"),
            item("c", &["drama"]).with_text("Space robots explode"),
        ];
        let index = ContentIndex::build(&catalog);

        let sim_ab = index.similarity("a", "b").unwrap();
        let sim_ac = index.similarity("a", "c").unwrap();
        assert!(sim_ab > sim_ac);
    }

    #[test]
    fn test_rare_tags_weigh_more_than_common_ones() {
        // "common" appears everywhere and is idf-downweighted, so sharing
        // the rare tag scores higher than sharing the common one.
        let catalog = vec![
            item("a", &["common", "rare"]),
            item("b", &["common", "rare"]),
            item("c", &["common", "other"]),
            item("d", &["common"]),
        ];
        let index = ContentIndex::build(&catalog);

        let sim_rare = index.similarity("a", "b").unwrap();
        let sim_common = index.similarity("a", "d").unwrap();
        assert!(sim_rare > sim_common);
    }

    #[test]
    fn test_duplicate_item_last_wins() {
        let catalog = vec![
            item("a", &["old"]),
            item("a", &["new"]),
            item("b", &["new"]),
        ];
        let index = ContentIndex::build(&catalog);
        assert_eq!(index.len(), 2);
        let sim = index.similarity("a", "b").unwrap();
        assert!(sim > 0.9);
    }
}
