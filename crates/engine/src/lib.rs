//! Hybrid media recommendation engine.
//!
//! Recommends items to users from sparse historical rating data, degrading
//! gracefully when a user (or item) has no history:
//!
//! - a latent-factor collaborative-filtering model (biased low-rank
//!   factorization trained by alternating least squares)
//! - a popularity scorer for user cold start, with Bayesian shrinkage
//!   toward the global mean
//! - a content-similarity signal (TF-IDF over item tags and text) for item
//!   cold start
//! - a hybrid blender that routes and combines the three per request
//! - an offline evaluation/cross-validation harness for model selection
//!
//! The REST layer, persistence, and data ingestion are external
//! collaborators: this crate consumes in-memory rating and item-metadata
//! tables and produces ranked [`Recommendation`] lists plus a serializable
//! trained-model artifact.

pub mod artifact;
pub mod blend;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod factorization;
pub mod features;
pub mod matrix;
pub mod popularity;
pub mod types;

// Re-export key types
pub use artifact::{ModelArtifact, TrainingMeta};
pub use blend::{BlendConfig, BlendDecision, ColdStartReason, HybridBlender};
pub use engine::{EngineConfig, ModelState, RecommenderEngine};
pub use error::{EntityKind, RecommenderError, Result};
pub use evaluation::{
    AggregateMetrics, EvaluationConfig, EvaluationReport, Evaluator, FoldMetrics, MetricSummary,
    SplitStrategy,
};
pub use factorization::{FactorizationConfig, LatentFactorModel, TrainingReport};
pub use features::ContentIndex;
pub use matrix::{IndexMap, RatingMatrix};
pub use popularity::{MinVotes, PopularityConfig, PopularityScore, PopularityTable};
pub use types::{
    ItemMetadata, Rating, RatingScale, RatingStats, Recommendation, RecommendationSource,
};
