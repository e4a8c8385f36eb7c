//! Core types for MedGate

use serde::{Deserialize, Serialize};
use std::fmt;

/// The disease models served by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Structured health metrics (heart disease risk)
    Tabular,
    /// MRI scans (brain tumor classification)
    Image,
}

impl ModelVariant {
    /// Every variant, in a stable order
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Tabular, ModelVariant::Image];

    /// Stable identifier used in records and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tabular => "heart_disease",
            Self::Image => "brain_tumor",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Tabular => "heart disease",
            Self::Image => "brain tumor",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw form value as delivered by the web layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Uniform output of every model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// One of the model's fixed output classes
    pub label: String,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Finer-grained class, when the model distinguishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// Score vector in the model's class order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_scores: Option<Vec<f32>>,
}

impl PredictionResult {
    /// Create a new prediction result
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            subtype: None,
            raw_scores: None,
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_raw_scores(mut self, scores: Vec<f32>) -> Self {
        self.raw_scores = Some(scores);
        self
    }

    /// Check if confidence reaches threshold
    pub fn exceeds_threshold(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}
