//! Heart disease risk model over structured health metrics
//!
//! The artifact is a JSON bundle holding the trained estimator together with
//! the feature names it was fit on, so inputs can be reordered to match:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "feature_names": ["age", "sex", "cp", ...],
//!   "scaler": { "mean": [...], "scale": [...] },
//!   "estimator": { "kind": "random_forest", "trees": [{ "nodes": [...] }] }
//! }
//! ```

use crate::config::{RiskBand, TabularModelConfig};
use crate::model::{DetectableModel, ModelInput, NormalizedInput};
use crate::schema::TabularSchema;
use medgate_core::{LoadError, ModelVariant, PredictionError, PredictionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifact format this build understands
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

/// Serialized tabular model bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularArtifact {
    pub format_version: u32,

    /// Training column order
    pub feature_names: Vec<String>,

    #[serde(default)]
    pub scaler: Option<StandardScaler>,

    pub estimator: Estimator,
}

/// `(x - mean) / scale`, per feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Binary classifier producing the positive-class probability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    RandomForest { trees: Vec<DecisionTree> },
    Logistic { coefficients: Vec<f64>, intercept: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Node 0 is the root; children always follow their parent
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// `x[feature] <= threshold` goes left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Class weights `[negative, positive]`
    Leaf { value: Vec<f64> },
}

impl TabularArtifact {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Structural checks; returns a reason on failure
    fn check_structure(&self) -> Result<(), String> {
        let n = self.feature_names.len();
        if n == 0 {
            return Err("feature_names is empty".to_string());
        }

        if let Some(scaler) = &self.scaler {
            if scaler.mean.len() != n || scaler.scale.len() != n {
                return Err(format!("scaler must have {} entries", n));
            }
            if scaler.scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                return Err("scaler.scale entries must be finite and non-zero".to_string());
            }
        }

        match &self.estimator {
            Estimator::Logistic {
                coefficients,
                intercept,
            } => {
                if coefficients.len() != n {
                    return Err(format!(
                        "logistic model has {} coefficients for {} features",
                        coefficients.len(),
                        n
                    ));
                }
                if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
                    return Err("logistic parameters must be finite".to_string());
                }
            }
            Estimator::RandomForest { trees } => {
                if trees.is_empty() {
                    return Err("random forest has no trees".to_string());
                }
                for (t, tree) in trees.iter().enumerate() {
                    tree.check(n).map_err(|e| format!("tree {}: {}", t, e))?;
                }
            }
        }
        Ok(())
    }

    /// Positive-class probability for an artifact-ordered, scaled vector
    fn positive_probability(&self, x: &[f64]) -> f64 {
        match &self.estimator {
            Estimator::Logistic {
                coefficients,
                intercept,
            } => {
                let z: f64 = coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + intercept;
                1.0 / (1.0 + (-z).exp())
            }
            Estimator::RandomForest { trees } => {
                let total: f64 = trees.iter().map(|tree| tree.positive_share(x)).sum();
                total / trees.len() as f64
            }
        }
    }
}

impl DecisionTree {
    fn check(&self, num_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= num_features {
                        return Err(format!("node {} splits on unknown feature {}", idx, feature));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {} has a NaN threshold", idx));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", idx, child));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != 2 {
                        return Err(format!("leaf {} must have 2 class weights", idx));
                    }
                    if value.iter().any(|v| *v < 0.0 || !v.is_finite()) {
                        return Err(format!("leaf {} has invalid weights", idx));
                    }
                    if value.iter().sum::<f64>() <= 0.0 {
                        return Err(format!("leaf {} has zero total weight", idx));
                    }
                }
            }
        }
        Ok(())
    }

    /// Walks from the root. Children always have larger indices, so this terminates.
    fn positive_share(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { value } => {
                    return value[1] / (value[0] + value[1]);
                }
            }
        }
    }
}

/// Heart disease risk classifier.
///
/// Maps the artifact's disease probability onto configured risk bands; the
/// bands' labels, highest risk first, are the model's output classes.
pub struct HeartDiseaseModel {
    name: String,
    artifact_path: PathBuf,
    schema: TabularSchema,
    /// Sorted by `min_probability`, highest first
    bands: Vec<RiskBand>,
    classes: Vec<String>,
    artifact: Option<TabularArtifact>,
}

impl HeartDiseaseModel {
    pub fn new(config: &TabularModelConfig, schema: TabularSchema) -> Self {
        let mut bands = config.risk_bands.clone();
        bands.sort_by(|a, b| b.min_probability.total_cmp(&a.min_probability));
        let classes = bands.iter().map(|b| b.label.clone()).collect();

        Self {
            name: config.name.clone(),
            artifact_path: config.artifact.clone(),
            schema,
            bands,
            classes,
            artifact: None,
        }
    }

    fn loaded(&self) -> Result<&TabularArtifact, PredictionError> {
        self.artifact
            .as_ref()
            .ok_or_else(|| PredictionError::NotLoaded(self.name.clone()))
    }

    fn band_for(&self, probability: f64) -> &str {
        self.bands
            .iter()
            .find(|band| probability >= band.min_probability)
            .or(self.bands.last())
            .map(|band| band.label.as_str())
            .unwrap_or_default()
    }

    fn read_artifact(&self) -> Result<TabularArtifact, LoadError> {
        let path = &self.artifact_path;
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::Missing { path: path.clone() },
            _ => LoadError::Failed(format!("failed to read {}: {}", path.display(), e)),
        })?;

        let artifact = TabularArtifact::from_json(&contents)
            .map_err(|e| LoadError::corrupt(path, e))?;

        if artifact.format_version != SUPPORTED_FORMAT_VERSION {
            return Err(LoadError::incompatible(
                path,
                format!(
                    "format version {} (supported: {})",
                    artifact.format_version, SUPPORTED_FORMAT_VERSION
                ),
            ));
        }

        if let Some(unknown) = artifact
            .feature_names
            .iter()
            .find(|name| !self.schema.contains(name))
        {
            return Err(LoadError::incompatible(
                path,
                format!("feature '{}' is not part of the input schema", unknown),
            ));
        }

        artifact
            .check_structure()
            .map_err(|reason| LoadError::corrupt(path, reason))?;

        Ok(artifact)
    }
}

impl DetectableModel for HeartDiseaseModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> ModelVariant {
        ModelVariant::Tabular
    }

    fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    fn is_loaded(&self) -> bool {
        self.artifact.is_some()
    }

    fn load(&mut self) -> Result<(), LoadError> {
        if self.artifact.is_some() {
            return Ok(());
        }

        let artifact = self.read_artifact()?;
        info!(
            model = %self.name,
            features = artifact.feature_names.len(),
            "Loaded tabular artifact from {}",
            self.artifact_path.display()
        );
        self.artifact = Some(artifact);
        Ok(())
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn preprocess(&self, input: ModelInput<'_>) -> Result<NormalizedInput, PredictionError> {
        let artifact = self.loaded()?;
        let ModelInput::Tabular(features) = input else {
            return Err(PredictionError::InputMismatch {
                model: self.name.clone(),
                expected: "tabular",
            });
        };

        let mut vector = Vec::with_capacity(artifact.feature_names.len());
        for name in &artifact.feature_names {
            let value = features.get(name).ok_or_else(|| PredictionError::ShapeMismatch {
                expected: format!("feature '{}'", name),
                actual: "absent".to_string(),
            })?;
            vector.push(value);
        }

        if let Some(scaler) = &artifact.scaler {
            for (i, value) in vector.iter_mut().enumerate() {
                *value = (*value - scaler.mean[i]) / scaler.scale[i];
            }
        }

        Ok(NormalizedInput::Features(vector))
    }

    fn predict(&self, input: NormalizedInput) -> Result<PredictionResult, PredictionError> {
        let artifact = self.loaded()?;
        let NormalizedInput::Features(x) = input else {
            return Err(PredictionError::InputMismatch {
                model: self.name.clone(),
                expected: "a feature vector",
            });
        };

        if x.len() != artifact.feature_names.len() {
            return Err(PredictionError::ShapeMismatch {
                expected: format!("{} features", artifact.feature_names.len()),
                actual: format!("{} features", x.len()),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(PredictionError::numeric("non-finite feature value"));
        }

        let probability = artifact.positive_probability(&x);
        if !probability.is_finite() {
            return Err(PredictionError::numeric("estimator produced a non-finite probability"));
        }
        let probability = probability.clamp(0.0, 1.0);

        let label = self.band_for(probability).to_string();
        debug!(model = %self.name, probability, label = %label, "tabular inference");

        let p = probability as f32;
        Ok(PredictionResult::new(label, p).with_raw_scores(vec![1.0 - p, p]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TabularFeatures;
    use medgate_core::FieldValue;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn features() -> TabularFeatures {
        let form: HashMap<String, FieldValue> = [
            ("age", 54.0),
            ("sex", 1.0),
            ("cp", 0.0),
            ("trestbps", 130.0),
            ("chol", 246.0),
            ("fbs", 0.0),
            ("restecg", 1.0),
            ("thalach", 150.0),
            ("exang", 0.0),
            ("oldpeak", 1.0),
            ("slope", 2.0),
            ("ca", 0.0),
            ("thal", 3.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), FieldValue::Number(v)))
        .collect();
        TabularSchema::heart_disease().validate(&form).unwrap()
    }

    fn model_with(dir: &TempDir, artifact: &str) -> HeartDiseaseModel {
        let path = dir.path().join("heart.json");
        std::fs::write(&path, artifact).unwrap();
        let config = TabularModelConfig {
            artifact: path,
            ..Default::default()
        };
        HeartDiseaseModel::new(&config, TabularSchema::heart_disease())
    }

    const FOREST: &str = r#"{
        "format_version": 1,
        "feature_names": ["age", "chol"],
        "estimator": {
            "kind": "random_forest",
            "trees": [
                { "nodes": [
                    { "feature": 0, "threshold": 50.0, "left": 1, "right": 2 },
                    { "value": [9.0, 1.0] },
                    { "value": [1.0, 3.0] }
                ] },
                { "nodes": [
                    { "feature": 1, "threshold": 240.0, "left": 1, "right": 2 },
                    { "value": [1.0, 1.0] },
                    { "value": [0.0, 5.0] }
                ] }
            ]
        }
    }"#;

    #[test]
    fn test_forest_prediction() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(&dir, FOREST);
        model.load().unwrap();

        let input = model.preprocess(ModelInput::Tabular(&features())).unwrap();
        let result = model.predict(input).unwrap();

        // (0.75 + 1.0) / 2
        assert!((result.confidence - 0.875).abs() < 1e-6);
        assert_eq!(result.label, "High Risk");
        assert_eq!(result.raw_scores.as_ref().map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_logistic_with_scaler() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(
            &dir,
            r#"{
                "format_version": 1,
                "feature_names": ["age"],
                "scaler": { "mean": [54.0], "scale": [10.0] },
                "estimator": { "kind": "logistic", "coefficients": [1.0], "intercept": 0.0 }
            }"#,
        );
        model.load().unwrap();

        let input = model.preprocess(ModelInput::Tabular(&features())).unwrap();
        match &input {
            NormalizedInput::Features(x) => assert_eq!(x, &vec![0.0]),
            _ => panic!("expected features"),
        }

        let result = model.predict(input).unwrap();
        assert!((result.confidence - 0.5).abs() < 1e-6);
        assert_eq!(result.label, "Medium Risk");
    }

    #[test]
    fn test_predict_before_load() {
        let dir = TempDir::new().unwrap();
        let model = model_with(&dir, FOREST);

        let err = model.predict(NormalizedInput::Features(vec![1.0, 2.0])).unwrap_err();
        assert!(matches!(err, PredictionError::NotLoaded(_)));
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(&dir, FOREST);
        model.load().unwrap();

        // A second load must not touch the file again
        std::fs::remove_file(dir.path().join("heart.json")).unwrap();
        model.load().unwrap();
        assert!(model.is_loaded());
    }

    #[test]
    fn test_missing_artifact() {
        let config = TabularModelConfig {
            artifact: PathBuf::from("/nonexistent/heart.json"),
            ..Default::default()
        };
        let mut model = HeartDiseaseModel::new(&config, TabularSchema::heart_disease());

        assert!(matches!(model.load(), Err(LoadError::Missing { .. })));
        assert!(!model.is_loaded());
    }

    #[test]
    fn test_corrupt_artifact() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(&dir, "{ not json");
        assert!(matches!(model.load(), Err(LoadError::Corrupt { .. })));
    }

    #[test]
    fn test_cyclic_tree_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(
            &dir,
            r#"{
                "format_version": 1,
                "feature_names": ["age"],
                "estimator": { "kind": "random_forest", "trees": [ { "nodes": [
                    { "feature": 0, "threshold": 1.0, "left": 0, "right": 1 },
                    { "value": [1.0, 1.0] }
                ] } ] }
            }"#,
        );
        assert!(matches!(model.load(), Err(LoadError::Corrupt { .. })));
    }

    #[test]
    fn test_incompatible_version_and_features() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(
            &dir,
            r#"{ "format_version": 2, "feature_names": ["age"],
                 "estimator": { "kind": "logistic", "coefficients": [1.0], "intercept": 0.0 } }"#,
        );
        assert!(matches!(model.load(), Err(LoadError::Incompatible { .. })));

        let mut model = model_with(
            &dir,
            r#"{ "format_version": 1, "feature_names": ["bmi"],
                 "estimator": { "kind": "logistic", "coefficients": [1.0], "intercept": 0.0 } }"#,
        );
        assert!(matches!(model.load(), Err(LoadError::Incompatible { .. })));
    }

    #[test]
    fn test_shape_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut model = model_with(&dir, FOREST);
        model.load().unwrap();

        let err = model.predict(NormalizedInput::Features(vec![1.0])).unwrap_err();
        assert!(matches!(err, PredictionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_band_boundaries() {
        let dir = TempDir::new().unwrap();
        let model = model_with(&dir, FOREST);

        assert_eq!(model.band_for(0.7), "High Risk");
        assert_eq!(model.band_for(0.69), "Medium Risk");
        assert_eq!(model.band_for(0.0), "Low Risk");
        assert_eq!(model.classes(), &["High Risk", "Medium Risk", "Low Risk"]);
    }

    #[test]
    fn test_classes_listed_highest_risk_first() {
        let config = TabularModelConfig {
            risk_bands: vec![RiskBand::new("Normal", 0.0), RiskBand::new("Elevated", 0.5)],
            ..Default::default()
        };
        let model = HeartDiseaseModel::new(&config, TabularSchema::heart_disease());

        assert_eq!(model.classes(), &["Elevated", "Normal"]);
        assert_eq!(model.band_for(0.6), "Elevated");
    }
}
