//! Detectable model capability and its input types

use crate::schema::TabularFeatures;
use candle_core::Tensor;
use medgate_core::{LoadError, ModelVariant, PredictionError, PredictionResult};
use std::path::Path;

/// Trait for every disease model served by the gateway.
///
/// A model starts unloaded. [`DetectableModel::load`] brings its artifact into
/// memory exactly once; later calls are no-ops. Once loaded the model is
/// read-only, so `preprocess` and `predict` take `&self` and may run
/// concurrently unless [`DetectableModel::supports_concurrent_inference`]
/// says otherwise.
pub trait DetectableModel: Send + Sync {
    /// Symbolic model name
    fn name(&self) -> &str;

    /// Which prediction path this model serves
    fn variant(&self) -> ModelVariant;

    /// Location of the serialized artifact
    fn artifact_path(&self) -> &Path;

    fn is_loaded(&self) -> bool;

    /// Read the artifact into memory. Idempotent after the first success.
    fn load(&mut self) -> Result<(), LoadError>;

    /// The fixed set of labels this model can return. Tabular risk models
    /// list their bands highest risk first.
    fn classes(&self) -> &[String];

    /// Turn raw input into the exact numeric shape the artifact expects
    fn preprocess(&self, input: ModelInput<'_>) -> Result<NormalizedInput, PredictionError>;

    /// Run the artifact and map its scores into a [`PredictionResult`]
    fn predict(&self, input: NormalizedInput) -> Result<PredictionResult, PredictionError>;

    /// Whether `predict` may be called from several threads at once
    fn supports_concurrent_inference(&self) -> bool {
        true
    }
}

/// Raw, validated input handed to [`DetectableModel::preprocess`]
#[derive(Debug, Clone, Copy)]
pub enum ModelInput<'a> {
    /// Schema-ordered tabular features
    Tabular(&'a TabularFeatures),
    /// Encoded image bytes (PNG, JPEG, BMP)
    Image(&'a [u8]),
}

impl ModelInput<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tabular(_) => "tabular",
            Self::Image(_) => "image",
        }
    }
}

/// Model-ready numeric input
#[derive(Debug, Clone)]
pub enum NormalizedInput {
    /// Feature vector in artifact order, scaled
    Features(Vec<f64>),
    /// Pixel tensor of shape (channels, height, width)
    Pixels(Tensor),
}

impl NormalizedInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Features(_) => "feature vector",
            Self::Pixels(_) => "pixel tensor",
        }
    }
}

/// Index and value of the highest score. NaN never wins.
pub(crate) fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}
