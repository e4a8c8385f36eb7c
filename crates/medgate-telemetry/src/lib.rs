//! MedGate Telemetry
//!
//! Telemetry and persistence collaborators for MedGate.
//!
//! Provides:
//! - Per-variant prediction and model-load metrics
//! - An append-only JSON-lines prediction log with history queries
//! - An in-memory prediction sink

pub mod metrics;
pub mod persistence;

pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use persistence::{HistoryQuery, JsonlPredictionLog, MemorySink, PersistenceConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::MetricsCollector;
    pub use crate::persistence::{JsonlPredictionLog, MemorySink, PersistenceConfig};
}
