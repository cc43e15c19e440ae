//! Trained-model artifacts.
//!
//! An artifact bundles everything the serving path needs: the latent-factor
//! model (with its index maps), the popularity ranking, the content index,
//! and training metadata. The byte-level export/import hooks are opaque to
//! callers; the surrounding system owns where the bytes live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RecommenderError, Result};
use crate::factorization::{FactorizationConfig, LatentFactorModel};
use crate::features::ContentIndex;
use crate::popularity::PopularityTable;

/// Metadata recorded at the end of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMeta {
    pub artifact_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub hyperparameters: FactorizationConfig,
    pub n_users: usize,
    pub n_items: usize,
    pub n_ratings: usize,
    pub iterations_run: usize,
}

/// Immutable snapshot produced by one training run. Exactly one artifact is
/// active in an engine at a time; hot swap replaces the whole snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub meta: TrainingMeta,
    pub model: LatentFactorModel,
    pub popularity: PopularityTable,
    pub content: ContentIndex,
}

impl ModelArtifact {
    /// Serializes the artifact to an opaque byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| RecommenderError::Data(format!("failed to encode artifact: {e}")))
    }

    /// Restores an artifact previously produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| RecommenderError::Data(format!("failed to decode artifact: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factorization::LatentFactorModel;
    use crate::matrix::RatingMatrix;
    use crate::popularity::PopularityConfig;
    use crate::types::{ItemMetadata, Rating, RatingScale};

    fn artifact() -> ModelArtifact {
        let ratings = vec![
            Rating::new("u1", "i1", 4.0, 1),
            Rating::new("u1", "i2", 2.0, 2),
            Rating::new("u2", "i1", 5.0, 3),
            Rating::new("u2", "i2", 1.0, 4),
        ];
        let matrix = RatingMatrix::from_ratings(&ratings, RatingScale::default()).unwrap();
        let config = FactorizationConfig {
            rank: 2,
            max_iterations: 200,
            convergence_tolerance: 1e-3,
            ..Default::default()
        };
        let (model, report) = LatentFactorModel::train(&matrix, config.clone()).unwrap();
        let popularity = PopularityTable::build(&ratings, &PopularityConfig::default());
        let content = ContentIndex::build(&[ItemMetadata::new(
            "i1",
            vec!["drama".to_string()],
        )]);

        ModelArtifact {
            meta: TrainingMeta {
                artifact_id: Uuid::new_v4(),
                trained_at: Utc::now(),
                hyperparameters: config,
                n_users: 2,
                n_items: 2,
                n_ratings: 4,
                iterations_run: report.iterations_run,
            },
            model,
            popularity,
            content,
        }
    }

    #[test]
    fn test_round_trip_preserves_predictions() {
        let original = artifact();
        let bytes = original.to_bytes().unwrap();
        let restored = ModelArtifact::from_bytes(&bytes).unwrap();

        assert_eq!(restored.meta, original.meta);
        assert_eq!(
            restored.model.predict("u1", "i1").unwrap(),
            original.model.predict("u1", "i1").unwrap()
        );
        assert_eq!(restored.popularity.len(), original.popularity.len());
        assert_eq!(restored.content.len(), original.content.len());
    }

    #[test]
    fn test_corrupt_bytes_rejected() {
        let err = ModelArtifact::from_bytes(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, RecommenderError::Data(_)));
    }
}
