//! Error types for MedGate
//!
//! Prediction failures are split by origin so the caller can tell a bad request
//! from an unavailable model from a failed inference:
//! - [`ValidationError`]: the request itself is unusable
//! - [`LoadError`]: a model artifact could not be brought into memory
//! - [`PredictionError`]: preprocessing or inference failed on a loaded model
//!
//! [`OrchestrationError`] wraps any of them with the request stage that failed.

use crate::types::ModelVariant;
use std::fmt;
use std::path::PathBuf;

/// Result type alias using MedGate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for configuration, persistence, and other non-request operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistence collaborator errors
    #[error("persistence error: {0}")]
    Persistence(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// The request could not be accepted. Never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' is not numeric: {value:?}")]
    NotNumeric { field: String, value: String },

    #[error("field '{0}' must be a finite number")]
    NonFinite(String),

    #[error("image payload is empty")]
    EmptyPayload,

    #[error("image payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),

    #[error("payload is not a recognized image")]
    UnrecognizedImage,
}

/// A model artifact could not be loaded.
///
/// Clonable so that a single failed load attempt can be reported to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("artifact not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("artifact {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("artifact {} is incompatible: {reason}", path.display())]
    Incompatible { path: PathBuf, reason: String },

    #[error("model load failed: {0}")]
    Failed(String),
}

impl LoadError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn incompatible(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Incompatible {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Preprocessing or inference failed on a model. Deterministic, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("model '{0}' is not loaded")]
    NotLoaded(String),

    #[error("model '{model}' expects {expected} input")]
    InputMismatch { model: String, expected: &'static str },

    #[error("input shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("numeric failure during inference: {0}")]
    Numeric(String),

    #[error("model produced an invalid result: {0}")]
    InvalidOutput(String),
}

impl PredictionError {
    pub fn numeric(msg: impl fmt::Display) -> Self {
        Self::Numeric(msg.to_string())
    }
}

/// Per-request processing stage.
///
/// A request moves `Received → Validated → ModelAcquired → Preprocessed →
/// Inferred → Formatted`; the stage recorded on failure is the one that did
/// not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    ModelAcquired,
    Preprocessed,
    Inferred,
    Formatted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::ModelAcquired => "model_acquired",
            Self::Preprocessed => "preprocessed",
            Self::Inferred => "inferred",
            Self::Formatted => "formatted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of an [`OrchestrationError`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureKind {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// A prediction request failed at `stage`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{variant} prediction failed at stage '{stage}': {kind}")]
pub struct OrchestrationError {
    pub stage: Stage,
    pub variant: ModelVariant,
    #[source]
    pub kind: FailureKind,
}

impl OrchestrationError {
    pub fn new(stage: Stage, variant: ModelVariant, kind: impl Into<FailureKind>) -> Self {
        Self {
            stage,
            variant,
            kind: kind.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, FailureKind::Validation(_))
    }

    pub fn is_load(&self) -> bool {
        matches!(self.kind, FailureKind::Load(_))
    }

    pub fn is_prediction(&self) -> bool {
        matches!(self.kind, FailureKind::Prediction(_))
    }

    /// Message safe to show an end user: validation problems are echoed,
    /// everything else is summarized without paths or internals.
    pub fn user_message(&self) -> String {
        match &self.kind {
            FailureKind::Validation(e) => format!("Invalid input: {}.", e),
            FailureKind::Load(_) => format!(
                "The {} model is temporarily unavailable. Please try again later.",
                self.variant.display_name()
            ),
            FailureKind::Prediction(PredictionError::Decode(_)) => {
                "The uploaded image could not be read. Please upload a valid image file."
                    .to_string()
            }
            FailureKind::Prediction(_) => format!(
                "The {} model could not process this input.",
                self.variant.display_name()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_paths() {
        let err = OrchestrationError::new(
            Stage::ModelAcquired,
            ModelVariant::Tabular,
            LoadError::Missing {
                path: PathBuf::from("/srv/models/heart_model.json"),
            },
        );

        let msg = err.user_message();
        assert!(!msg.contains("/srv"));
        assert!(msg.contains("heart disease"));
        assert!(err.is_load());
    }

    #[test]
    fn test_validation_message_is_echoed() {
        let err = OrchestrationError::new(
            Stage::Validated,
            ModelVariant::Tabular,
            ValidationError::MissingField("age".to_string()),
        );

        assert!(err.is_validation());
        assert!(err.user_message().contains("age"));
        assert!(err.to_string().contains("validated"));
    }
}
