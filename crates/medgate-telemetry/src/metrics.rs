//! Metrics collection and reporting

use medgate_core::{ModelVariant, Stage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stages a request can fail at, in pipeline order
const FAILURE_STAGES: [Stage; 6] = [
    Stage::Received,
    Stage::Validated,
    Stage::ModelAcquired,
    Stage::Preprocessed,
    Stage::Inferred,
    Stage::Formatted,
];

/// Metrics collector for MedGate prediction monitoring.
///
/// Keeps in-process counters readable through [`MetricsCollector::snapshot`]
/// and mirrors every update to the `metrics` facade for whichever recorder
/// the host process installs.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    tabular: VariantCounters,
    image: VariantCounters,
}

#[derive(Default)]
struct VariantCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: [AtomicU64; 6],
    loads: AtomicU64,
    load_failures: AtomicU64,
    latency_us: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, variant: ModelVariant) -> &VariantCounters {
        match variant {
            ModelVariant::Tabular => &self.inner.tabular,
            ModelVariant::Image => &self.inner.image,
        }
    }

    /// Record an incoming prediction request
    pub fn record_request(&self, variant: ModelVariant) {
        self.counters(variant).requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful prediction and its end-to-end latency
    pub fn record_success(&self, variant: ModelVariant, latency_us: u64) {
        let counters = self.counters(variant);
        counters.successes.fetch_add(1, Ordering::Relaxed);
        counters.latency_us.fetch_add(latency_us, Ordering::Relaxed);

        metrics::counter!(
            "medgate_predictions_total",
            "variant" => variant.as_str(),
            "outcome" => "success"
        )
        .increment(1);
        metrics::histogram!("medgate_prediction_latency_us", "variant" => variant.as_str())
            .record(latency_us as f64);
    }

    /// Record a failed prediction
    pub fn record_failure(&self, variant: ModelVariant, stage: Stage) {
        let idx = stage_index(stage);
        self.counters(variant).failures[idx].fetch_add(1, Ordering::Relaxed);

        metrics::counter!(
            "medgate_predictions_total",
            "variant" => variant.as_str(),
            "outcome" => "failure",
            "stage" => stage.as_str()
        )
        .increment(1);
    }

    /// Record the outcome of a model load attempt
    pub fn record_load(&self, variant: ModelVariant, success: bool) {
        let counters = self.counters(variant);
        if success {
            counters.loads.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.load_failures.fetch_add(1, Ordering::Relaxed);
        }

        metrics::counter!(
            "medgate_model_loads_total",
            "variant" => variant.as_str(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    /// Get current metrics snapshot for one variant
    pub fn snapshot(&self, variant: ModelVariant) -> MetricsSnapshot {
        let counters = self.counters(variant);
        MetricsSnapshot {
            requests: counters.requests.load(Ordering::Relaxed),
            successes: counters.successes.load(Ordering::Relaxed),
            failures_by_stage: FAILURE_STAGES
                .iter()
                .enumerate()
                .map(|(idx, stage)| (*stage, counters.failures[idx].load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            loads: counters.loads.load(Ordering::Relaxed),
            load_failures: counters.load_failures.load(Ordering::Relaxed),
            total_latency_us: counters.latency_us.load(Ordering::Relaxed),
        }
    }
}

fn stage_index(stage: Stage) -> usize {
    FAILURE_STAGES
        .iter()
        .position(|s| *s == stage)
        .unwrap_or(0)
}

/// Snapshot of current metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    /// Non-zero failure counts keyed by failing stage
    pub failures_by_stage: Vec<(Stage, u64)>,
    pub loads: u64,
    pub load_failures: u64,
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    pub fn failures(&self) -> u64 {
        self.failures_by_stage.iter().map(|(_, count)| count).sum()
    }

    pub fn failures_at(&self, stage: Stage) -> u64 {
        self.failures_by_stage
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Calculate average latency per successful prediction
    pub fn avg_latency_us(&self) -> u64 {
        if self.successes == 0 {
            0
        } else {
            self.total_latency_us / self.successes
        }
    }
}
