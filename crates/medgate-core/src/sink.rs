//! Outbound persistence interface for completed predictions

use crate::types::{ModelVariant, PredictionResult};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One completed prediction, as handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Unique record ID
    pub id: String,

    /// Account that requested the prediction
    pub user_id: i64,

    pub model_variant: ModelVariant,

    /// SHA-256 of the canonical input, hex encoded
    pub input_digest: String,

    /// Short human-readable description of the input
    pub input_summary: String,

    pub label: String,

    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// RFC 3339 UTC timestamp, second precision
    pub created_at: String,
}

impl PredictionRecord {
    /// Create a record stamped with a fresh ID and the current time
    pub fn new(
        user_id: i64,
        model_variant: ModelVariant,
        input_digest: impl Into<String>,
        input_summary: impl Into<String>,
        result: &PredictionResult,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            model_variant,
            input_digest: input_digest.into(),
            input_summary: input_summary.into(),
            label: result.label.clone(),
            confidence: result.confidence,
            subtype: result.subtype.clone(),
            created_at: now_rfc3339(),
        }
    }

    /// Parsed creation time, if the stored timestamp is well formed
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Persistence collaborator receiving prediction records.
///
/// Failures are reported to the caller, which decides whether they matter;
/// the orchestrator never fails a prediction because a record was lost.
#[async_trait]
pub trait PredictionSink: Send + Sync {
    /// Store a record, returning the ID it was stored under
    async fn record(&self, record: &PredictionRecord) -> Result<String>;
}

/// Hex-encoded SHA-256 of `bytes`
pub fn input_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
