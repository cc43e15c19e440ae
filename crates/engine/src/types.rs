//! Core data types shared across the engine.

use serde::{Deserialize, Serialize};

use crate::error::{RecommenderError, Result};

/// A single observed rating. Immutable once ingested; the canonical table is
/// owned by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: String,
    pub item_id: String,
    pub score: f32,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl Rating {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        score: f32,
        timestamp: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            score,
            timestamp,
        }
    }
}

/// Item metadata consumed from the catalog collaborator: categorical tags
/// plus optional free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub item_id: String,
    pub tags: Vec<String>,
    pub text: Option<String>,
}

impl ItemMetadata {
    pub fn new(item_id: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            item_id: item_id.into(),
            tags,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// The bounded rating scale. Scores outside the scale are rejected at
/// ingestion; predictions are clipped into it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub min_score: f32,
    pub max_score: f32,
}

impl RatingScale {
    pub fn new(min_score: f32, max_score: f32) -> Result<Self> {
        if !min_score.is_finite() || !max_score.is_finite() || min_score >= max_score {
            return Err(RecommenderError::Data(format!(
                "invalid rating scale [{min_score}, {max_score}]"
            )));
        }
        Ok(Self {
            min_score,
            max_score,
        })
    }

    pub fn contains(&self, score: f32) -> bool {
        score.is_finite() && score >= self.min_score && score <= self.max_score
    }

    pub fn clip(&self, score: f32) -> f32 {
        score.clamp(self.min_score, self.max_score)
    }

    pub fn span(&self) -> f32 {
        self.max_score - self.min_score
    }
}

impl Default for RatingScale {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            max_score: 5.0,
        }
    }
}

/// Which signal produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationSource {
    Collaborative,
    Popularity,
    Content,
    Blended,
}

/// One entry of a ranked recommendation list. Ephemeral: produced per
/// request and never persisted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_id: String,
    pub item_id: String,
    pub predicted_score: f32,
    pub source: RecommendationSource,
    /// 1-based position in the ranked list.
    pub rank: usize,
}

/// Summary statistics over a rating table, logged at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub n_ratings: usize,
    pub n_users: usize,
    pub n_items: usize,
    pub mean_score: f32,
    pub score_std: f32,
    pub mean_ratings_per_user: f32,
    pub mean_ratings_per_item: f32,
}

impl RatingStats {
    pub fn compute(ratings: &[Rating]) -> Option<Self> {
        if ratings.is_empty() {
            return None;
        }

        let mut users = std::collections::HashSet::new();
        let mut items = std::collections::HashSet::new();
        let mut sum = 0.0f64;
        for r in ratings {
            users.insert(r.user_id.as_str());
            items.insert(r.item_id.as_str());
            sum += f64::from(r.score);
        }

        let n = ratings.len() as f64;
        let mean = sum / n;
        let variance = ratings
            .iter()
            .map(|r| (f64::from(r.score) - mean).powi(2))
            .sum::<f64>()
            / n;

        Some(Self {
            n_ratings: ratings.len(),
            n_users: users.len(),
            n_items: items.len(),
            mean_score: mean as f32,
            score_std: variance.sqrt() as f32,
            mean_ratings_per_user: ratings.len() as f32 / users.len() as f32,
            mean_ratings_per_item: ratings.len() as f32 / items.len() as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_contains_and_clip() {
        let scale = RatingScale::default();
        assert!(scale.contains(0.5));
        assert!(scale.contains(5.0));
        assert!(!scale.contains(0.0));
        assert!(!scale.contains(5.5));
        assert!(!scale.contains(f32::NAN));

        assert_eq!(scale.clip(7.3), 5.0);
        assert_eq!(scale.clip(-1.0), 0.5);
        assert_eq!(scale.clip(3.0), 3.0);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        assert!(RatingScale::new(5.0, 0.5).is_err());
        assert!(RatingScale::new(1.0, 1.0).is_err());
        assert!(RatingScale::new(f32::NAN, 5.0).is_err());
    }

    #[test]
    fn test_rating_stats() {
        let ratings = vec![
            Rating::new("u1", "i1", 4.0, 100),
            Rating::new("u1", "i2", 2.0, 101),
            Rating::new("u2", "i1", 3.0, 102),
        ];

        let stats = RatingStats::compute(&ratings).unwrap();
        assert_eq!(stats.n_ratings, 3);
        assert_eq!(stats.n_users, 2);
        assert_eq!(stats.n_items, 2);
        assert!((stats.mean_score - 3.0).abs() < 1e-6);
        assert!((stats.mean_ratings_per_user - 1.5).abs() < 1e-6);

        assert!(RatingStats::compute(&[]).is_none());
    }
}
