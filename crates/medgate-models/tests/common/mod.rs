//! Counting model doubles for manager and orchestrator tests
//!
//! Each double records how often it was loaded and how often it predicted,
//! and can be told to load slowly, fail to load, or predict slowly.

#![allow(dead_code)]

use medgate_core::{LoadError, ModelVariant, PredictionError, PredictionResult};
use medgate_models::{DetectableModel, ModelFactory, ModelInput, NormalizedInput};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Route `tracing` output through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("medgate_models=debug"))
        .with_test_writer()
        .try_init();
}

/// Shared counters across every instance a factory creates
#[derive(Debug, Default)]
pub struct Counters {
    loads: AtomicUsize,
    predictions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Counters {
    /// Number of `load` calls, successful or not
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn predictions(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `predict` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Behaviour of a counting double
#[derive(Debug, Clone)]
pub struct DoubleSpec {
    variant: ModelVariant,
    classes: Vec<String>,
    result: PredictionResult,
    load_delay: Duration,
    load_error: Option<LoadError>,
    /// Loads numbered below this fail with `load_error`
    failing_loads: usize,
    predict_delay: Duration,
    concurrent: bool,
}

impl DoubleSpec {
    /// Heart disease double answering "High Risk" at 0.82
    pub fn tabular() -> Self {
        Self {
            variant: ModelVariant::Tabular,
            classes: strings(&["High Risk", "Medium Risk", "Low Risk"]),
            result: PredictionResult::new("High Risk", 0.82).with_raw_scores(vec![0.18, 0.82]),
            load_delay: Duration::ZERO,
            load_error: None,
            failing_loads: 0,
            predict_delay: Duration::ZERO,
            concurrent: true,
        }
    }

    /// Brain tumor double answering "glioma" at 0.9
    pub fn image() -> Self {
        Self {
            variant: ModelVariant::Image,
            classes: strings(&["glioma", "meningioma", "no_tumor", "pituitary"]),
            result: PredictionResult::new("glioma", 0.9).with_subtype("glioma"),
            ..Self::tabular()
        }
    }

    pub fn with_result(mut self, result: PredictionResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Every load fails with `error`
    pub fn failing(self, error: LoadError) -> Self {
        self.failing_times(error, usize::MAX)
    }

    /// The first `times` loads fail with `error`, later ones succeed
    pub fn failing_times(mut self, error: LoadError, times: usize) -> Self {
        self.load_error = Some(error);
        self.failing_loads = times;
        self
    }

    pub fn with_predict_delay(mut self, delay: Duration) -> Self {
        self.predict_delay = delay;
        self
    }

    /// Report that inference must not run concurrently
    pub fn single_threaded(mut self) -> Self {
        self.concurrent = false;
        self
    }

    /// Factory producing fresh doubles that share one set of counters
    pub fn factory(self) -> (Arc<dyn ModelFactory>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);
        let factory: Arc<dyn ModelFactory> = Arc::new(move || {
            Box::new(CountingModel {
                spec: self.clone(),
                counters: Arc::clone(&shared),
                loaded: false,
            }) as Box<dyn DetectableModel>
        });
        (factory, counters)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub struct CountingModel {
    spec: DoubleSpec,
    counters: Arc<Counters>,
    loaded: bool,
}

impl DetectableModel for CountingModel {
    fn name(&self) -> &str {
        "counting-double"
    }

    fn variant(&self) -> ModelVariant {
        self.spec.variant
    }

    fn artifact_path(&self) -> &Path {
        Path::new("memory://counting-double")
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load(&mut self) -> Result<(), LoadError> {
        if self.loaded {
            return Ok(());
        }
        let attempt = self.counters.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.spec.load_delay);

        if let Some(err) = &self.spec.load_error {
            if attempt < self.spec.failing_loads {
                return Err(err.clone());
            }
        }
        self.loaded = true;
        Ok(())
    }

    fn classes(&self) -> &[String] {
        &self.spec.classes
    }

    fn preprocess(&self, input: ModelInput<'_>) -> Result<NormalizedInput, PredictionError> {
        match (self.spec.variant, input) {
            (ModelVariant::Tabular, ModelInput::Tabular(features)) => {
                Ok(NormalizedInput::Features(features.iter().map(|(_, v)| v).collect()))
            }
            (ModelVariant::Image, ModelInput::Image(bytes)) => {
                Ok(NormalizedInput::Features(vec![bytes.len() as f64]))
            }
            (variant, _) => Err(PredictionError::InputMismatch {
                model: self.name().to_string(),
                expected: match variant {
                    ModelVariant::Tabular => "tabular",
                    ModelVariant::Image => "image",
                },
            }),
        }
    }

    fn predict(&self, _input: NormalizedInput) -> Result<PredictionResult, PredictionError> {
        if !self.loaded {
            return Err(PredictionError::NotLoaded(self.name().to_string()));
        }
        self.counters.predictions.fetch_add(1, Ordering::SeqCst);

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.spec.predict_delay);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self.spec.result.clone())
    }

    fn supports_concurrent_inference(&self) -> bool {
        self.spec.concurrent
    }
}

/// A complete heart disease form
pub fn heart_form() -> std::collections::HashMap<String, medgate_core::FieldValue> {
    [
        ("age", "63"),
        ("sex", "1"),
        ("cp", "3"),
        ("trestbps", "145"),
        ("chol", "233"),
        ("fbs", "1"),
        ("restecg", "0"),
        ("thalach", "150"),
        ("exang", "0"),
        ("oldpeak", "2.3"),
        ("slope", "0"),
        ("ca", "0"),
        ("thal", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.into()))
    .collect()
}

/// Path that does not exist inside `dir`
pub fn missing_artifact(dir: &Path) -> PathBuf {
    dir.join("does-not-exist.bin")
}
