//! MedGate Core
//!
//! Core types, traits, and utilities shared across MedGate components.
//!
//! This crate provides:
//! - The uniform prediction result and model variant types
//! - The error taxonomy for validation, loading, prediction, and orchestration
//! - The persistence interface for completed predictions

pub mod error;
pub mod sink;
pub mod types;

pub use error::{
    Error, FailureKind, LoadError, OrchestrationError, PredictionError, Result, Stage,
    ValidationError,
};
pub use sink::{input_digest, PredictionRecord, PredictionSink};
pub use types::{FieldValue, ModelVariant, PredictionResult};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{
        Error, LoadError, OrchestrationError, PredictionError, Result, Stage, ValidationError,
    };
    pub use crate::sink::{PredictionRecord, PredictionSink};
    pub use crate::types::{FieldValue, ModelVariant, PredictionResult};
}
