//! MedGate Models
//!
//! Disease models and the request path that serves them.
//!
//! - [`HeartDiseaseModel`] scores structured health metrics against a JSON
//!   tree-ensemble or logistic artifact
//! - [`BrainTumorModel`] classifies MRI scans with a Candle network loaded
//!   from safetensors
//! - [`ModelManager`] loads each model once, on first use, and shares it
//! - [`PredictionOrchestrator`] validates input, runs the model and checks
//!   the result before it leaves the gateway

pub mod advice;
pub mod brain_tumor;
pub mod config;
pub mod heart_disease;
pub mod manager;
pub mod model;
pub mod orchestrator;
pub mod schema;

pub use brain_tumor::BrainTumorModel;
pub use config::{
    GatewayConfig, ImageArchitecture, ImageInputSpec, ImageModelConfig, LimitsConfig,
    ModelsConfig, Normalization, RiskBand, TabularModelConfig,
};
pub use heart_disease::{
    DecisionTree, Estimator, HeartDiseaseModel, StandardScaler, TabularArtifact, TreeNode,
};
pub use manager::{ModelFactory, ModelHandle, ModelManager, ModelManagerBuilder};
pub use model::{DetectableModel, ModelInput, NormalizedInput};
pub use orchestrator::{AssessedPrediction, PredictionOrchestrator};
pub use schema::{FeatureSpec, FieldKind, TabularFeatures, TabularSchema};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::manager::{ModelHandle, ModelManager};
    pub use crate::model::{DetectableModel, ModelInput, NormalizedInput};
    pub use crate::orchestrator::{AssessedPrediction, PredictionOrchestrator};
    pub use crate::schema::{TabularFeatures, TabularSchema};
}
