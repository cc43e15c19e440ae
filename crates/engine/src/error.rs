//! Error taxonomy for the recommendation engine.
//!
//! Every fallible operation in this crate returns [`Result`]. Entity-level
//! failures ([`RecommenderError::UnknownEntity`]) are recoverable and handled
//! by the hybrid blender; the remaining variants propagate to the caller.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RecommenderError>;

/// Which kind of id failed to resolve against the trained index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Item,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Item => write!(f, "item"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RecommenderError {
    /// Malformed, empty, or out-of-range input.
    #[error("invalid input data: {0}")]
    Data(String),

    /// Training exhausted its iteration budget without meeting the
    /// convergence tolerance. Non-fatal: retry with a relaxed tolerance,
    /// a larger budget, or fewer factors.
    #[error(
        "training stopped after {iterations} iterations without converging \
         (last relative improvement {last_improvement:.2e})"
    )]
    Convergence {
        iterations: usize,
        last_improvement: f32,
    },

    /// Prediction attempted before any successful training run.
    #[error("no trained model is available")]
    ModelNotReady,

    /// Id absent from the trained index maps.
    #[error("unknown {kind} id: {id}")]
    UnknownEntity { kind: EntityKind, id: String },

    /// No usable signal at all for this request.
    #[error("no usable recommendation signal is available")]
    InsufficientData,

    /// A training run is already in flight for this engine.
    #[error("another training run is already in progress")]
    TrainingInProgress,
}

impl RecommenderError {
    pub(crate) fn unknown_user(id: &str) -> Self {
        RecommenderError::UnknownEntity {
            kind: EntityKind::User,
            id: id.to_string(),
        }
    }

    pub(crate) fn unknown_item(id: &str) -> Self {
        RecommenderError::UnknownEntity {
            kind: EntityKind::Item,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecommenderError::unknown_user("u42");
        assert_eq!(err.to_string(), "unknown user id: u42");

        let err = RecommenderError::Data("empty ratings table".to_string());
        assert!(err.to_string().contains("empty ratings table"));
    }

    #[test]
    fn test_convergence_error_is_informative() {
        let err = RecommenderError::Convergence {
            iterations: 20,
            last_improvement: 0.5,
        };
        assert!(err.to_string().contains("20 iterations"));
    }
}
