//! The serving engine: one swappable active model, single-writer training.
//!
//! Serving is read-only and shared: each request grabs an `Arc` snapshot of
//! the active artifact, so a reader in flight sees either the old model or
//! the new one, never a half-swapped state. Training is guarded by an atomic
//! latch; a second concurrent call fails fast with a typed error instead of
//! queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::artifact::{ModelArtifact, TrainingMeta};
use crate::blend::{BlendConfig, HybridBlender};
use crate::error::{RecommenderError, Result};
use crate::factorization::{FactorizationConfig, LatentFactorModel};
use crate::features::ContentIndex;
use crate::matrix::RatingMatrix;
use crate::popularity::{PopularityConfig, PopularityTable};
use crate::types::{ItemMetadata, Rating, RatingScale, RatingStats, Recommendation};

/// Engine-level configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub scale: RatingScale,
    pub factorization: FactorizationConfig,
    pub blend: BlendConfig,
    pub popularity: PopularityConfig,
}

/// Lifecycle of the active model slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// No successful training run yet; all prediction calls are rejected.
    Untrained,
    /// A trained artifact is active and current.
    Trained,
    /// The active artifact was trained on data that has since been
    /// superseded; it keeps serving until a retrain completes.
    Stale,
}

pub struct RecommenderEngine {
    config: EngineConfig,
    catalog: RwLock<Arc<Vec<ItemMetadata>>>,
    active: RwLock<Option<Arc<ModelArtifact>>>,
    training: AtomicBool,
    stale: AtomicBool,
}

/// Releases the training latch on every exit path.
struct TrainingGuard<'a>(&'a AtomicBool);

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RecommenderEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            catalog: RwLock::new(Arc::new(Vec::new())),
            active: RwLock::new(None),
            training: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the item catalog used for content scoring from the next
    /// training cycle on. Flags the active model as stale if one exists.
    pub fn set_catalog(&self, items: Vec<ItemMetadata>) {
        *self.catalog.write() = Arc::new(items);
        if self.active.read().is_some() {
            self.stale.store(true, Ordering::Release);
        }
    }

    /// Collaborator hook: new ratings landed, the trained matrix is
    /// superseded. The model keeps serving until the next retrain.
    pub fn mark_stale(&self) {
        if self.active.read().is_some() {
            self.stale.store(true, Ordering::Release);
        }
    }

    pub fn state(&self) -> ModelState {
        if self.active.read().is_none() {
            ModelState::Untrained
        } else if self.stale.load(Ordering::Acquire) {
            ModelState::Stale
        } else {
            ModelState::Trained
        }
    }

    /// Trains with the engine's configured hyperparameters.
    pub fn train(&self, ratings: &[Rating]) -> Result<TrainingMeta> {
        self.train_with(ratings, self.config.factorization.clone())
    }

    /// Full training cycle: build the matrix, the popularity ranking, and
    /// the content index, fit the model, then atomically swap the active
    /// artifact. Exactly one run may be in flight; concurrent calls fail
    /// with [`RecommenderError::TrainingInProgress`].
    pub fn train_with(
        &self,
        ratings: &[Rating],
        hyperparameters: FactorizationConfig,
    ) -> Result<TrainingMeta> {
        if self
            .training
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(RecommenderError::TrainingInProgress);
        }
        let _guard = TrainingGuard(&self.training);

        if let Some(stats) = RatingStats::compute(ratings) {
            info!(
                n_ratings = stats.n_ratings,
                n_users = stats.n_users,
                n_items = stats.n_items,
                mean_score = stats.mean_score,
                "starting training run"
            );
        }

        let matrix = RatingMatrix::from_ratings(ratings, self.config.scale)?;
        let popularity = PopularityTable::build(ratings, &self.config.popularity);
        let catalog = Arc::clone(&self.catalog.read());
        let content = ContentIndex::build(&catalog);

        let (model, report) = LatentFactorModel::train(&matrix, hyperparameters.clone())?;

        let meta = TrainingMeta {
            artifact_id: Uuid::new_v4(),
            trained_at: chrono::Utc::now(),
            hyperparameters,
            n_users: matrix.n_users(),
            n_items: matrix.n_items(),
            n_ratings: matrix.n_observed(),
            iterations_run: report.iterations_run,
        };
        info!(
            artifact_id = %meta.artifact_id,
            iterations = report.iterations_run,
            "training converged; swapping active model"
        );

        let artifact = Arc::new(ModelArtifact {
            meta: meta.clone(),
            model,
            popularity,
            content,
        });

        *self.active.write() = Some(artifact);
        self.stale.store(false, Ordering::Release);

        Ok(meta)
    }

    /// Snapshot of the active artifact for read-only serving.
    pub fn active_artifact(&self) -> Result<Arc<ModelArtifact>> {
        self.active
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(RecommenderError::ModelNotReady)
    }

    /// Predicted score for a user-item pair. Unknown ids surface as
    /// [`RecommenderError::UnknownEntity`]; the caller decides how to fall
    /// back (the `recommend` path does so internally).
    pub fn predict(&self, user_id: &str, item_id: &str) -> Result<f32> {
        let artifact = self.active_artifact()?;
        artifact.model.predict(user_id, item_id)
    }

    /// Ranked recommendations for one user, at most `n` entries.
    pub fn recommend(&self, user_id: &str, n: usize) -> Result<Vec<Recommendation>> {
        let artifact = self.active_artifact()?;
        let blender = HybridBlender::new(
            &artifact.model,
            &artifact.popularity,
            &artifact.content,
            &self.config.blend,
        );
        blender.recommend(user_id, n)
    }

    /// Serializes the active artifact for persistence by the surrounding
    /// system.
    pub fn export_artifact(&self) -> Result<Vec<u8>> {
        self.active_artifact()?.to_bytes()
    }

    /// Installs a previously exported artifact as the active model, exactly
    /// like a completed training run.
    pub fn import_artifact(&self, bytes: &[u8]) -> Result<TrainingMeta> {
        let artifact = ModelArtifact::from_bytes(bytes)?;
        let meta = artifact.meta.clone();
        info!(artifact_id = %meta.artifact_id, "installing imported artifact");

        *self.active.write() = Some(Arc::new(artifact));
        self.stale.store(false, Ordering::Release);
        Ok(meta)
    }
}
