//! Prediction orchestration
//!
//! Drives one request through validation, model acquisition, preprocessing,
//! inference and result formatting. Each step either advances the request or
//! fails it at that stage; nothing is retried.

use crate::advice::advice_for;
use crate::config::{GatewayConfig, LimitsConfig};
use crate::manager::{ModelHandle, ModelManager};
use crate::model::ModelInput;
use crate::schema::{TabularFeatures, TabularSchema};
use image::ImageFormat;
use medgate_core::{
    input_digest, FailureKind, FieldValue, ModelVariant, OrchestrationError, PredictionError,
    PredictionRecord, PredictionResult, PredictionSink, Stage, ValidationError,
};
use medgate_telemetry::MetricsCollector;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How far past [0, 1] a confidence may drift before it is rejected
const CONFIDENCE_EPSILON: f32 = 1e-5;

/// A prediction together with what the caller shows the user
#[derive(Debug, Clone, Serialize)]
pub struct AssessedPrediction {
    pub variant: ModelVariant,

    pub result: PredictionResult,

    /// Suggestion text for the outcome
    pub advice: String,

    /// Set on the image path only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_tumor: Option<bool>,

    pub input_summary: String,

    /// ID of the stored record, if one was written
    pub record_id: Option<String>,
}

/// A checked result and the model that produced it
struct Completed {
    result: PredictionResult,
    handle: ModelHandle,
    /// Validated form, tabular path only
    features: Option<TabularFeatures>,
}

/// Entry point for both prediction paths
pub struct PredictionOrchestrator {
    manager: Arc<ModelManager>,
    schema: TabularSchema,
    limits: LimitsConfig,
    sink: Option<Arc<dyn PredictionSink>>,
    metrics: MetricsCollector,
}

impl PredictionOrchestrator {
    pub fn new(manager: Arc<ModelManager>, limits: LimitsConfig) -> Self {
        Self {
            manager,
            schema: TabularSchema::heart_disease(),
            limits,
            sink: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Wire the real models, limits and a shared metrics collector from a
    /// validated `config`
    pub fn from_config(
        config: &GatewayConfig,
        metrics: MetricsCollector,
    ) -> medgate_core::Result<Self> {
        let manager = Arc::new(ModelManager::from_config(config, metrics.clone())?);
        Ok(Self::new(manager, config.limits.clone()).with_metrics(metrics))
    }

    pub fn with_schema(mut self, schema: TabularSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PredictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Predict heart disease risk from raw form fields
    pub async fn predict_tabular(
        &self,
        fields: &HashMap<String, FieldValue>,
    ) -> Result<PredictionResult, OrchestrationError> {
        self.run_tabular(fields).await.map(|run| run.result)
    }

    /// Classify an encoded MRI image
    pub async fn predict_image(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<PredictionResult, OrchestrationError> {
        self.run_image(bytes, content_type).await.map(|run| run.result)
    }

    /// Run [`Self::predict_tabular`] and record the outcome for `user_id`
    pub async fn predict_tabular_for(
        &self,
        user_id: Option<i64>,
        fields: &HashMap<String, FieldValue>,
    ) -> Result<AssessedPrediction, OrchestrationError> {
        let Completed {
            result,
            handle,
            features,
        } = self.run_tabular(fields).await?;
        let input_summary = features.map(|f| f.summary()).unwrap_or_default();

        let record_id = match self.recorder(user_id) {
            Some((user_id, sink)) => {
                let digest = input_digest(input_summary.as_bytes());
                let record = PredictionRecord::new(
                    user_id,
                    ModelVariant::Tabular,
                    digest,
                    input_summary.clone(),
                    &result,
                );
                emit(sink, record).await
            }
            None => None,
        };

        Ok(AssessedPrediction {
            variant: ModelVariant::Tabular,
            advice: advice_for(ModelVariant::Tabular, &result, handle.classes()),
            is_tumor: None,
            input_summary,
            record_id,
            result,
        })
    }

    /// Run [`Self::predict_image`] and record the outcome for `user_id`
    pub async fn predict_image_for(
        &self,
        user_id: Option<i64>,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<AssessedPrediction, OrchestrationError> {
        let Completed { result, handle, .. } = self.run_image(bytes, content_type).await?;
        let input_summary = format!("image {} bytes, {}", bytes.len(), content_type.trim());

        let record_id = match self.recorder(user_id) {
            Some((user_id, sink)) => {
                let record = PredictionRecord::new(
                    user_id,
                    ModelVariant::Image,
                    input_digest(bytes),
                    input_summary.clone(),
                    &result,
                );
                emit(sink, record).await
            }
            None => None,
        };

        Ok(AssessedPrediction {
            variant: ModelVariant::Image,
            advice: advice_for(ModelVariant::Image, &result, handle.classes()),
            is_tumor: Some(result.subtype.is_some()),
            input_summary,
            record_id,
            result,
        })
    }

    async fn run_tabular(
        &self,
        fields: &HashMap<String, FieldValue>,
    ) -> Result<Completed, OrchestrationError> {
        let mut trace = RequestTrace::start(ModelVariant::Tabular, &self.metrics);

        let features = self.schema.validate(fields).map_err(|e| trace.fail(e))?;
        trace.advance(Stage::Validated);

        let handle = self
            .manager
            .get_tabular_model()
            .await
            .map_err(|e| trace.fail(e))?;
        trace.advance(Stage::ModelAcquired);

        let result = self
            .infer(&mut trace, &handle, ModelInput::Tabular(&features))
            .await?;
        Ok(Completed {
            result,
            handle,
            features: Some(features),
        })
    }

    async fn run_image(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Completed, OrchestrationError> {
        let mut trace = RequestTrace::start(ModelVariant::Image, &self.metrics);

        self.validate_image(bytes, content_type)
            .map_err(|e| trace.fail(e))?;
        trace.advance(Stage::Validated);

        let handle = self
            .manager
            .get_image_model()
            .await
            .map_err(|e| trace.fail(e))?;
        trace.advance(Stage::ModelAcquired);

        let result = self
            .infer(&mut trace, &handle, ModelInput::Image(bytes))
            .await?;
        Ok(Completed {
            result,
            handle,
            features: None,
        })
    }

    /// Preprocess, predict and format on an acquired model
    async fn infer(
        &self,
        trace: &mut RequestTrace<'_>,
        handle: &ModelHandle,
        input: ModelInput<'_>,
    ) -> Result<PredictionResult, OrchestrationError> {
        let normalized = handle.preprocess(input).await.map_err(|e| trace.fail(e))?;
        trace.advance(Stage::Preprocessed);

        let raw = handle.predict(normalized).await.map_err(|e| trace.fail(e))?;
        trace.advance(Stage::Inferred);

        let result = check_result(raw, handle.classes()).map_err(|e| trace.fail(e))?;
        trace.advance(Stage::Formatted);

        trace.succeed(handle.name(), &result);
        Ok(result)
    }

    /// Size, content type and magic bytes, all checked before any decode
    fn validate_image(&self, bytes: &[u8], content_type: &str) -> Result<(), ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if bytes.len() > self.limits.max_image_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.limits.max_image_bytes,
            });
        }

        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !self
            .limits
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&mime))
        {
            return Err(ValidationError::UnsupportedContentType(content_type.to_string()));
        }

        match image::guess_format(bytes) {
            Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp) => Ok(()),
            _ => Err(ValidationError::UnrecognizedImage),
        }
    }

    fn recorder(&self, user_id: Option<i64>) -> Option<(i64, &Arc<dyn PredictionSink>)> {
        Some((user_id?, self.sink.as_ref()?))
    }
}

async fn emit(sink: &Arc<dyn PredictionSink>, record: PredictionRecord) -> Option<String> {
    match sink.record(&record).await {
        Ok(id) => {
            debug!(record_id = %id, variant = %record.model_variant, "Prediction recorded");
            Some(id)
        }
        Err(e) => {
            warn!(variant = %record.model_variant, error = %e, "Failed to record prediction");
            None
        }
    }
}

/// Enforce the result invariants before a prediction leaves the gateway
fn check_result(
    mut result: PredictionResult,
    classes: &[String],
) -> Result<PredictionResult, PredictionError> {
    let confidence = result.confidence;
    if !confidence.is_finite() {
        return Err(PredictionError::InvalidOutput(format!(
            "confidence {} is not finite",
            confidence
        )));
    }
    if !(-CONFIDENCE_EPSILON..=1.0 + CONFIDENCE_EPSILON).contains(&confidence) {
        return Err(PredictionError::InvalidOutput(format!(
            "confidence {} outside [0, 1]",
            confidence
        )));
    }
    result.confidence = confidence.clamp(0.0, 1.0);

    if !classes.iter().any(|c| *c == result.label) {
        return Err(PredictionError::InvalidOutput(format!(
            "label '{}' is not one of the model's classes",
            result.label
        )));
    }
    if let Some(subtype) = &result.subtype {
        if !classes.iter().any(|c| c == subtype) {
            return Err(PredictionError::InvalidOutput(format!(
                "subtype '{}' is not one of the model's classes",
                subtype
            )));
        }
    }
    if let Some(scores) = &result.raw_scores {
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(PredictionError::InvalidOutput(
                "raw scores contain non-finite values".to_string(),
            ));
        }
    }

    Ok(result)
}

/// Per-request stage tracking, logging and metrics
struct RequestTrace<'a> {
    variant: ModelVariant,
    /// Last stage that completed
    stage: Stage,
    start: Instant,
    metrics: &'a MetricsCollector,
}

impl<'a> RequestTrace<'a> {
    fn start(variant: ModelVariant, metrics: &'a MetricsCollector) -> Self {
        metrics.record_request(variant);
        Self {
            variant,
            stage: Stage::Received,
            start: Instant::now(),
            metrics,
        }
    }

    fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        debug!(
            variant = %self.variant,
            stage = %stage,
            elapsed_us = self.start.elapsed().as_micros() as u64,
            "Request advanced"
        );
    }

    /// The stage after the last completed one
    fn pending(&self) -> Stage {
        match self.stage {
            Stage::Received => Stage::Validated,
            Stage::Validated => Stage::ModelAcquired,
            Stage::ModelAcquired => Stage::Preprocessed,
            Stage::Preprocessed => Stage::Inferred,
            Stage::Inferred | Stage::Formatted => Stage::Formatted,
        }
    }

    fn fail(&self, kind: impl Into<FailureKind>) -> OrchestrationError {
        let err = OrchestrationError::new(self.pending(), self.variant, kind);
        self.metrics.record_failure(self.variant, err.stage);

        let latency_us = self.start.elapsed().as_micros() as u64;
        if err.is_validation() {
            debug!(variant = %self.variant, stage = %err.stage, latency_us, error = %err.kind, "Request rejected");
        } else {
            warn!(variant = %self.variant, stage = %err.stage, latency_us, error = %err.kind, "Request failed");
        }
        err
    }

    fn succeed(&self, model: &str, result: &PredictionResult) {
        let latency_us = self.start.elapsed().as_micros() as u64;
        self.metrics.record_success(self.variant, latency_us);
        info!(
            variant = %self.variant,
            model = %model,
            label = %result.label,
            confidence = result.confidence,
            latency_us,
            "Prediction complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn classes() -> Vec<String> {
        ["Low Risk", "Medium Risk", "High Risk"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn orchestrator(max_image_bytes: usize) -> PredictionOrchestrator {
        let limits = LimitsConfig {
            max_image_bytes,
            ..LimitsConfig::default()
        };
        PredictionOrchestrator::new(Arc::new(ModelManager::builder().assemble()), limits)
    }

    #[test]
    fn test_check_result_clamps_within_epsilon() {
        let result = check_result(PredictionResult::new("High Risk", 1.000001), &classes()).unwrap();
        assert_eq!(result.confidence, 1.0);

        let result = check_result(PredictionResult::new("Low Risk", -0.000001), &classes()).unwrap();
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_check_result_rejects_bad_output() {
        let err = check_result(PredictionResult::new("High Risk", 1.2), &classes()).unwrap_err();
        assert!(matches!(err, PredictionError::InvalidOutput(_)));

        let err = check_result(PredictionResult::new("High Risk", f32::NAN), &classes()).unwrap_err();
        assert!(matches!(err, PredictionError::InvalidOutput(_)));

        let err = check_result(PredictionResult::new("Very High", 0.9), &classes()).unwrap_err();
        assert!(matches!(err, PredictionError::InvalidOutput(_)));

        let scores = PredictionResult::new("High Risk", 0.9).with_raw_scores(vec![0.1, f32::INFINITY]);
        let err = check_result(scores, &classes()).unwrap_err();
        assert!(matches!(err, PredictionError::InvalidOutput(_)));
    }

    #[test]
    fn test_validate_image_order() {
        let orch = orchestrator(16);

        assert_eq!(
            orch.validate_image(&[], "image/png"),
            Err(ValidationError::EmptyPayload)
        );
        assert_eq!(
            orch.validate_image(&[0u8; 17], "text/plain"),
            Err(ValidationError::PayloadTooLarge { size: 17, limit: 16 })
        );
        assert_eq!(
            orch.validate_image(PNG_MAGIC, "application/pdf"),
            Err(ValidationError::UnsupportedContentType("application/pdf".to_string()))
        );
        assert_eq!(
            orch.validate_image(b"GIF89a", "image/png"),
            Err(ValidationError::UnrecognizedImage)
        );
    }

    #[test]
    fn test_validate_image_content_type_parameters() {
        let orch = orchestrator(1024);
        assert!(orch.validate_image(PNG_MAGIC, " Image/PNG; charset=binary").is_ok());
    }

    #[test]
    fn test_pending_stage() {
        let metrics = MetricsCollector::new();
        let mut trace = RequestTrace::start(ModelVariant::Tabular, &metrics);
        assert_eq!(trace.pending(), Stage::Validated);

        trace.advance(Stage::ModelAcquired);
        let err = trace.fail(PredictionError::numeric("overflow"));
        assert_eq!(err.stage, Stage::Preprocessed);
        assert_eq!(metrics.snapshot(ModelVariant::Tabular).failures_at(Stage::Preprocessed), 1);
    }
}
