//! Hybrid blending of collaborative, popularity, and content signals.
//!
//! The routing policy is a single tagged decision computed once per request
//! from observable conditions (presence in the trained index, rating count),
//! so it can be tested independently of the scoring paths.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RecommenderError, Result};
use crate::factorization::LatentFactorModel;
use crate::features::ContentIndex;
use crate::popularity::PopularityTable;
use crate::types::{Recommendation, RecommendationSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendConfig {
    /// Users with fewer ratings than this are served the popularity ranking.
    pub cold_start_threshold: usize,
    /// Optional blending weight alpha in `[0, 1]`. When set, items carrying
    /// both a collaborative and a content score receive
    /// `alpha * collab + (1 - alpha) * content`. When unset, content scores
    /// only substitute for items the model cannot score.
    pub blend_weight: Option<f32>,
    /// How many of the user's highest-rated items seed the content profile.
    pub seed_items: usize,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            cold_start_threshold: 5,
            blend_weight: None,
            seed_items: 10,
        }
    }
}

impl BlendConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(alpha) = self.blend_weight {
            if !(0.0..=1.0).contains(&alpha) || !alpha.is_finite() {
                return Err(RecommenderError::Data(format!(
                    "blend weight {alpha} is outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Why a request was routed to the cold-start path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColdStartReason {
    UnknownUser,
    BelowThreshold { ratings: usize, threshold: usize },
}

/// Per-request routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendDecision {
    ColdStart(ColdStartReason),
    Personalized,
}

/// Combines the trained model, the popularity ranking, and the content index
/// into one ranked list. Read-only over all three.
pub struct HybridBlender<'a> {
    model: &'a LatentFactorModel,
    popularity: &'a PopularityTable,
    content: &'a ContentIndex,
    config: &'a BlendConfig,
}

impl<'a> HybridBlender<'a> {
    pub fn new(
        model: &'a LatentFactorModel,
        popularity: &'a PopularityTable,
        content: &'a ContentIndex,
        config: &'a BlendConfig,
    ) -> Self {
        Self {
            model,
            popularity,
            content,
            config,
        }
    }

    /// Routing decision for one user, from observable conditions only.
    pub fn decide(&self, user_id: &str) -> BlendDecision {
        match self.model.rating_count(user_id) {
            None => BlendDecision::ColdStart(ColdStartReason::UnknownUser),
            Some(count) if count < self.config.cold_start_threshold => {
                BlendDecision::ColdStart(ColdStartReason::BelowThreshold {
                    ratings: count,
                    threshold: self.config.cold_start_threshold,
                })
            }
            Some(_) => BlendDecision::Personalized,
        }
    }

    /// Ranked recommendations of size at most `n`. Deterministic under
    /// identical inputs and configuration.
    pub fn recommend(&self, user_id: &str, n: usize) -> Result<Vec<Recommendation>> {
        self.config.validate()?;

        let decision = self.decide(user_id);
        debug!(user_id, ?decision, "blend decision");

        match decision {
            BlendDecision::ColdStart(_) => {
                // A thin-history user still has rated items to leave out.
                let rated = self.rated_item_ids(user_id);
                let exclude: Vec<&str> = rated.iter().map(String::as_str).collect();
                self.popularity_ranking(user_id, n, &exclude)
            }
            BlendDecision::Personalized => self.personalized_ranking(user_id, n),
        }
    }

    fn popularity_ranking(
        &self,
        user_id: &str,
        n: usize,
        exclude: &[&str],
    ) -> Result<Vec<Recommendation>> {
        if self.popularity.is_empty() {
            return Err(RecommenderError::InsufficientData);
        }

        let ranked: Vec<Recommendation> = self
            .popularity
            .top_n(self.popularity.len())
            .iter()
            .filter(|score| !exclude.contains(&score.item_id.as_str()))
            .take(n)
            .enumerate()
            .map(|(position, score)| Recommendation {
                user_id: user_id.to_string(),
                item_id: score.item_id.clone(),
                predicted_score: score.weighted_score,
                source: RecommendationSource::Popularity,
                rank: position + 1,
            })
            .collect();

        if ranked.is_empty() {
            return Err(RecommenderError::InsufficientData);
        }
        Ok(ranked)
    }

    fn personalized_ranking(&self, user_id: &str, n: usize) -> Result<Vec<Recommendation>> {
        // `decide` established the user is known; an index miss here would
        // be a logic error, so surface it as the typed entity failure.
        let collaborative = self.model.candidates(user_id)?;
        let profile = self.content_profile(user_id);

        let mut candidates: Vec<(String, f32, RecommendationSource)> = Vec::new();

        for (item_id, collab_score) in collaborative {
            let blended = self.config.blend_weight.and_then(|alpha| {
                self.content_score(&profile, &item_id)
                    .map(|content| alpha * collab_score + (1.0 - alpha) * content)
            });
            match blended {
                Some(score) => candidates.push((
                    item_id,
                    self.model.scale().clip(score),
                    RecommendationSource::Blended,
                )),
                None => candidates.push((item_id, collab_score, RecommendationSource::Collaborative)),
            }
        }

        // Item cold start: catalog entries absent from the trained index get
        // a content score against the user's highest-rated items.
        for item_id in self.content.item_ids() {
            if self.model.item_index(item_id).is_some() {
                continue;
            }
            if let Some(score) = self.content_score(&profile, item_id) {
                candidates.push((item_id.clone(), score, RecommendationSource::Content));
            }
        }

        if candidates.is_empty() {
            // The collaborative model had nothing left to offer; fall back
            // to popularity, minus the items this user already rated.
            let rated = self.rated_item_ids(user_id);
            let exclude: Vec<&str> = rated.iter().map(String::as_str).collect();
            return self.popularity_ranking(user_id, n, &exclude);
        }

        candidates.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(n);

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(position, (item_id, score, source))| Recommendation {
                user_id: user_id.to_string(),
                item_id,
                predicted_score: score,
                source,
                rank: position + 1,
            })
            .collect())
    }

    /// The user's highest-rated items that carry content vectors, weighted
    /// by score. Empty when the user's history has no metadata coverage.
    fn content_profile(&self, user_id: &str) -> Vec<(String, f32)> {
        let Some(u) = self.model.user_index(user_id) else {
            return Vec::new();
        };

        let mut rated: Vec<(String, f32)> = self
            .model
            .rated_by_index(u)
            .iter()
            .filter_map(|&(item_idx, score)| {
                let id = self.model.items().id_at(item_idx)?;
                self.content.contains(id).then(|| (id.to_string(), score))
            })
            .collect();

        rated.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        rated.truncate(self.config.seed_items);
        rated
    }

    /// Score-weighted mean content similarity between `item_id` and the
    /// profile seeds, mapped onto the rating scale. `None` when no pairwise
    /// similarity can be computed.
    fn content_score(&self, profile: &[(String, f32)], item_id: &str) -> Option<f32> {
        if profile.is_empty() || !self.content.contains(item_id) {
            return None;
        }

        let mut weighted = 0.0f32;
        let mut weight_sum = 0.0f32;
        for (seed_id, seed_score) in profile {
            if seed_id == item_id {
                continue;
            }
            if let Some(similarity) = self.content.similarity(seed_id, item_id) {
                weighted += similarity * seed_score;
                weight_sum += seed_score;
            }
        }

        if weight_sum <= 0.0 {
            return None;
        }

        let similarity = (weighted / weight_sum).clamp(0.0, 1.0);
        let scale = self.model.scale();
        Some(scale.min_score + similarity * scale.span())
    }

    fn rated_item_ids(&self, user_id: &str) -> Vec<String> {
        let Some(u) = self.model.user_index(user_id) else {
            return Vec::new();
        };
        self.model
            .rated_by_index(u)
            .iter()
            .filter_map(|&(item_idx, _)| self.model.items().id_at(item_idx).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factorization::FactorizationConfig;
    use crate::matrix::RatingMatrix;
    use crate::popularity::{MinVotes, PopularityConfig};
    use crate::types::{ItemMetadata, Rating, RatingScale};

    fn fact_config() -> FactorizationConfig {
        FactorizationConfig {
            rank: 2,
            regularization: 0.1,
            bias_regularization: 10.0,
            max_iterations: 200,
            convergence_tolerance: 1e-3,
            random_seed: 11,
        }
    }

    /// Two taste clusters over a shared catalog. `s3` is rated by every
    /// sci-fi fan except `sci0`, so `sci0` keeps an in-index collaborative
    /// candidate.
    fn ratings() -> Vec<Rating> {
        let mut out = Vec::new();
        for u in 0..4 {
            out.push(Rating::new(format!("sci{u}"), "s1", 5.0, 1));
            out.push(Rating::new(format!("sci{u}"), "s2", 4.5, 2));
            out.push(Rating::new(format!("sci{u}"), "r1", 1.5, 3));
            out.push(Rating::new(format!("sci{u}"), "r2", 2.0, 4));
            out.push(Rating::new(format!("sci{u}"), "c1", 3.0, 5));
            if u > 0 {
                out.push(Rating::new(format!("sci{u}"), "s3", 4.0, 6));
            }

            out.push(Rating::new(format!("rom{u}"), "r1", 5.0, 1));
            out.push(Rating::new(format!("rom{u}"), "r2", 4.5, 2));
            out.push(Rating::new(format!("rom{u}"), "s1", 1.0, 3));
            out.push(Rating::new(format!("rom{u}"), "s2", 2.0, 4));
            out.push(Rating::new(format!("rom{u}"), "c1", 3.5, 5));
        }
        // A thin-history user below the default cold-start threshold.
        out.push(Rating::new("newbie", "s1", 5.0, 9));
        out
    }

    fn catalog() -> Vec<ItemMetadata> {
        vec![
            ItemMetadata::new("s1", vec!["scifi".into(), "space".into()]),
            ItemMetadata::new("s2", vec!["scifi".into(), "space".into()]),
            ItemMetadata::new("s3", vec!["scifi".into()]),
            ItemMetadata::new("r1", vec!["romance".into()]),
            ItemMetadata::new("r2", vec!["romance".into(), "drama".into()]),
            // Never rated by anyone: only reachable through content.
            ItemMetadata::new("s_new", vec!["scifi".into(), "space".into()]),
        ]
    }

    struct Fixture {
        model: LatentFactorModel,
        popularity: PopularityTable,
        content: ContentIndex,
    }

    fn fixture() -> Fixture {
        let ratings = ratings();
        let matrix = RatingMatrix::from_ratings(&ratings, RatingScale::default()).unwrap();
        let (model, _) = LatentFactorModel::train(&matrix, fact_config()).unwrap();
        let popularity = PopularityTable::build(
            &ratings,
            &PopularityConfig {
                min_votes: MinVotes::Fixed(3),
            },
        );
        let content = ContentIndex::build(&catalog());
        Fixture {
            model,
            popularity,
            content,
        }
    }

    fn blender<'a>(fixture: &'a Fixture, config: &'a BlendConfig) -> HybridBlender<'a> {
        HybridBlender::new(
            &fixture.model,
            &fixture.popularity,
            &fixture.content,
            config,
        )
    }

    #[test]
    fn test_unknown_user_routes_to_popularity() {
        let fixture = fixture();
        let config = BlendConfig::default();
        let blender = blender(&fixture, &config);

        assert_eq!(
            blender.decide("stranger"),
            BlendDecision::ColdStart(ColdStartReason::UnknownUser)
        );

        let recs = blender.recommend("stranger", 3).unwrap();
        assert_eq!(recs.len(), 3);
        assert!(recs
            .iter()
            .all(|r| r.source == RecommendationSource::Popularity));
        assert_eq!(recs[0].rank, 1);
        assert_eq!(recs[2].rank, 3);
    }

    #[test]
    fn test_thin_history_routes_to_popularity() {
        let fixture = fixture();
        let config = BlendConfig::default();
        let blender = blender(&fixture, &config);

        assert_eq!(
            blender.decide("newbie"),
            BlendDecision::ColdStart(ColdStartReason::BelowThreshold {
                ratings: 1,
                threshold: 5,
            })
        );
        let recs = blender.recommend("newbie", 5).unwrap();
        assert!(recs
            .iter()
            .all(|r| r.source == RecommendationSource::Popularity));
    }

    #[test]
    fn test_established_user_is_personalized() {
        let fixture = fixture();
        let config = BlendConfig::default();
        let blender = blender(&fixture, &config);

        assert_eq!(blender.decide("sci0"), BlendDecision::Personalized);

        let recs = blender.recommend("sci0", 5).unwrap();
        assert!(!recs.is_empty());
        // Above the threshold the output is never pure popularity.
        assert!(recs
            .iter()
            .all(|r| r.source != RecommendationSource::Popularity));
    }

    #[test]
    fn test_unrated_catalog_item_gets_content_score() {
        let fixture = fixture();
        let config = BlendConfig::default();
        let blender = blender(&fixture, &config);

        let recs = blender.recommend("sci0", 10).unwrap();
        let cold = recs
            .iter()
            .find(|r| r.item_id == "s_new")
            .expect("unrated catalog item should surface via content");
        assert_eq!(cold.source, RecommendationSource::Content);

        // A sci-fi fan's content profile puts the new sci-fi title near the
        // top of the scale.
        assert!(cold.predicted_score > 3.0);
    }

    #[test]
    fn test_blend_weight_produces_blended_sources() {
        let fixture = fixture();
        let config = BlendConfig {
            blend_weight: Some(0.6),
            ..BlendConfig::default()
        };
        let blender = blender(&fixture, &config);

        let recs = blender.recommend("sci0", 10).unwrap();
        // Catalog-covered collaborative candidates blend; the never-rated
        // item stays content-only.
        assert!(recs
            .iter()
            .any(|r| r.source == RecommendationSource::Blended));
        let cold = recs.iter().find(|r| r.item_id == "s_new").unwrap();
        assert_eq!(cold.source, RecommendationSource::Content);
    }

    #[test]
    fn test_invalid_blend_weight_rejected() {
        let fixture = fixture();
        let config = BlendConfig {
            blend_weight: Some(1.5),
            ..BlendConfig::default()
        };
        let blender = blender(&fixture, &config);
        assert!(matches!(
            blender.recommend("sci0", 5),
            Err(RecommenderError::Data(_))
        ));
    }

    #[test]
    fn test_recommend_is_idempotent() {
        let fixture = fixture();
        let config = BlendConfig::default();
        let blender = blender(&fixture, &config);

        let first = blender.recommend("rom1", 5).unwrap();
        let second = blender.recommend("rom1", 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_popularity_is_insufficient_data() {
        let fixture = fixture();
        let empty = PopularityTable::default();
        let config = BlendConfig::default();
        let blender = HybridBlender::new(&fixture.model, &empty, &fixture.content, &config);

        assert!(matches!(
            blender.recommend("stranger", 5),
            Err(RecommenderError::InsufficientData)
        ));
    }
}
