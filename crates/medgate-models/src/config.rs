//! Gateway configuration: model artifacts, input limits, and persistence

use medgate_core::{Error, Result};
use medgate_telemetry::PersistenceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.models.tabular.validate()?;
        self.models.image.validate()?;

        if self.limits.max_image_bytes == 0 {
            return Err(Error::config("limits.max_image_bytes must be positive"));
        }
        if self.limits.allowed_content_types.is_empty() {
            return Err(Error::config("limits.allowed_content_types must not be empty"));
        }
        Ok(())
    }
}

/// One entry per model variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub tabular: TabularModelConfig,

    #[serde(default)]
    pub image: ImageModelConfig,
}

/// Heart disease model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularModelConfig {
    #[serde(default = "default_tabular_name")]
    pub name: String,

    /// JSON artifact bundle
    #[serde(default = "default_tabular_artifact")]
    pub artifact: PathBuf,

    /// Probability bands mapped to output labels, highest first
    #[serde(default = "default_risk_bands")]
    pub risk_bands: Vec<RiskBand>,

    /// Serialize inference calls on this model
    #[serde(default)]
    pub serialize_inference: bool,
}

impl Default for TabularModelConfig {
    fn default() -> Self {
        Self {
            name: default_tabular_name(),
            artifact: default_tabular_artifact(),
            risk_bands: default_risk_bands(),
            serialize_inference: false,
        }
    }
}

impl TabularModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.risk_bands.is_empty() {
            return Err(Error::config("models.tabular.risk_bands must not be empty"));
        }
        for band in &self.risk_bands {
            if !(0.0..=1.0).contains(&band.min_probability) {
                return Err(Error::config(format!(
                    "risk band '{}' has min_probability {} outside [0, 1]",
                    band.label, band.min_probability
                )));
            }
        }
        if !self.risk_bands.iter().any(|b| b.min_probability == 0.0) {
            return Err(Error::config(
                "models.tabular.risk_bands needs a band with min_probability 0",
            ));
        }
        Ok(())
    }
}

/// Probabilities at or above `min_probability` map to `label`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBand {
    pub label: String,
    pub min_probability: f64,
}

impl RiskBand {
    pub fn new(label: impl Into<String>, min_probability: f64) -> Self {
        Self {
            label: label.into(),
            min_probability,
        }
    }
}

fn default_tabular_name() -> String {
    "heart-disease".to_string()
}

fn default_tabular_artifact() -> PathBuf {
    PathBuf::from("models/heart_model.json")
}

fn default_risk_bands() -> Vec<RiskBand> {
    vec![
        RiskBand::new("High Risk", 0.7),
        RiskBand::new("Medium Risk", 0.4),
        RiskBand::new("Low Risk", 0.0),
    ]
}

/// Brain tumor model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageModelConfig {
    #[serde(default = "default_image_name")]
    pub name: String,

    /// Safetensors weight file
    #[serde(default = "default_image_artifact")]
    pub artifact: PathBuf,

    /// Resolution and channel count the artifact was trained on
    #[serde(default)]
    pub input: ImageInputSpec,

    /// Output classes in score order
    #[serde(default = "default_image_classes")]
    pub classes: Vec<String>,

    /// Classes reported as the result subtype (the tumor types)
    #[serde(default = "default_subtype_classes")]
    pub subtype_classes: Vec<String>,

    #[serde(default)]
    pub architecture: ImageArchitecture,

    /// Per-channel normalization applied after scaling pixels to [0, 1]
    #[serde(default)]
    pub normalization: Option<Normalization>,

    /// Device to run on (cpu, cuda, metal)
    #[serde(default = "default_device")]
    pub device: String,

    /// Serialize inference calls on this model
    #[serde(default)]
    pub serialize_inference: bool,
}

impl Default for ImageModelConfig {
    fn default() -> Self {
        Self {
            name: default_image_name(),
            artifact: default_image_artifact(),
            input: ImageInputSpec::default(),
            classes: default_image_classes(),
            subtype_classes: default_subtype_classes(),
            architecture: ImageArchitecture::default(),
            normalization: None,
            device: default_device(),
            serialize_inference: false,
        }
    }
}

impl ImageModelConfig {
    pub fn validate(&self) -> Result<()> {
        let input = &self.input;
        if input.width == 0 || input.height == 0 {
            return Err(Error::config("models.image.input dimensions must be positive"));
        }
        if input.channels != 1 && input.channels != 3 {
            return Err(Error::config(format!(
                "models.image.input.channels must be 1 or 3, got {}",
                input.channels
            )));
        }
        if self.classes.is_empty() {
            return Err(Error::config("models.image.classes must not be empty"));
        }
        if let Some(unknown) = self
            .subtype_classes
            .iter()
            .find(|c| !self.classes.contains(c))
        {
            return Err(Error::config(format!(
                "subtype class '{}' is not one of models.image.classes",
                unknown
            )));
        }
        if let Some(norm) = &self.normalization {
            let channels = input.channels as usize;
            if norm.mean.len() != channels || norm.std.len() != channels {
                return Err(Error::config(format!(
                    "normalization needs {} mean and std values",
                    channels
                )));
            }
            if norm.std.iter().any(|s| *s <= 0.0) {
                return Err(Error::config("normalization std values must be positive"));
            }
        }
        if let ImageArchitecture::Mlp { hidden } = self.architecture {
            if hidden == 0 {
                return Err(Error::config("mlp hidden size must be positive"));
            }
        }
        Ok(())
    }
}

/// Expected input geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInputSpec {
    pub width: u32,
    pub height: u32,
    /// 1 (grayscale) or 3 (RGB)
    pub channels: u32,
}

impl ImageInputSpec {
    /// Flattened element count, saturating instead of wrapping
    pub fn len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.channels as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ImageInputSpec {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            channels: 1,
        }
    }
}

/// Classifier network stored in the safetensors artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageArchitecture {
    /// `classifier` layer over the flattened input
    #[default]
    Linear,
    /// `hidden` layer, ReLU, then `classifier`
    Mlp { hidden: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

fn default_image_name() -> String {
    "brain-tumor".to_string()
}

fn default_image_artifact() -> PathBuf {
    PathBuf::from("models/brain_tumor.safetensors")
}

fn default_image_classes() -> Vec<String> {
    ["glioma", "meningioma", "no_tumor", "pituitary"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_subtype_classes() -> Vec<String> {
    ["glioma", "meningioma", "pituitary"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_device() -> String {
    "cpu".to_string()
}

/// Limits applied to untrusted input before it reaches a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted image upload
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Largest decoded width or height
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,

    #[serde(default = "default_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
            max_image_dimension: default_max_image_dimension(),
            allowed_content_types: default_content_types(),
        }
    }
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_max_image_dimension() -> u32 {
    8192
}

fn default_content_types() -> Vec<String> {
    ["image/png", "image/jpeg", "image/bmp"]
        .into_iter()
        .map(String::from)
        .collect()
}
