//! Model cache that loads each variant on first access
//!
//! Each variant owns one slot. A slot is empty, loading, or ready:
//! - the first caller on an empty slot starts a load on the blocking pool;
//! - callers arriving while a load is in flight await that same attempt and
//!   all receive its outcome;
//! - a failed attempt leaves the slot empty, so the next call retries;
//! - a successful attempt fills the slot for the rest of the process.

use crate::brain_tumor::BrainTumorModel;
use crate::config::GatewayConfig;
use crate::heart_disease::HeartDiseaseModel;
use crate::model::{DetectableModel, ModelInput, NormalizedInput};
use crate::schema::TabularSchema;
use futures::future::{BoxFuture, FutureExt, Shared};
use medgate_core::{Error, LoadError, ModelVariant, PredictionError, PredictionResult, Result};
use medgate_telemetry::MetricsCollector;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Builds fresh, unloaded model instances for one variant
pub trait ModelFactory: Send + Sync {
    fn create(&self) -> Box<dyn DetectableModel>;
}

impl<F> ModelFactory for F
where
    F: Fn() -> Box<dyn DetectableModel> + Send + Sync,
{
    fn create(&self) -> Box<dyn DetectableModel> {
        self()
    }
}

/// A cached, ready-to-use model
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<dyn DetectableModel>,
    /// Present when inference on this model must be serialized
    inference_gate: Option<Arc<tokio::sync::Mutex<()>>>,
}

impl ModelHandle {
    fn new(model: Arc<dyn DetectableModel>, force_serial: bool) -> Self {
        let serialize = force_serial || !model.supports_concurrent_inference();
        Self {
            model,
            inference_gate: serialize.then(|| Arc::new(tokio::sync::Mutex::new(()))),
        }
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn variant(&self) -> ModelVariant {
        self.model.variant()
    }

    pub fn classes(&self) -> &[String] {
        self.model.classes()
    }

    pub fn model(&self) -> &Arc<dyn DetectableModel> {
        &self.model
    }

    pub fn is_serialized(&self) -> bool {
        self.inference_gate.is_some()
    }

    /// Whether both handles point at the same loaded instance
    pub fn same_instance(&self, other: &ModelHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.model) as *const (),
            Arc::as_ptr(&other.model) as *const (),
        )
    }

    /// Turn raw input into model input. Image decoding and resizing run on
    /// the blocking pool.
    pub async fn preprocess(
        &self,
        input: ModelInput<'_>,
    ) -> std::result::Result<NormalizedInput, PredictionError> {
        match input {
            ModelInput::Tabular(_) => self.model.preprocess(input),
            ModelInput::Image(bytes) => {
                let model = Arc::clone(&self.model);
                let bytes = bytes.to_vec();
                run_blocking(move || model.preprocess(ModelInput::Image(&bytes))).await
            }
        }
    }

    /// Run inference on the blocking pool, holding the per-variant gate if
    /// the model needs one
    pub async fn predict(
        &self,
        input: NormalizedInput,
    ) -> std::result::Result<PredictionResult, PredictionError> {
        let guard = match &self.inference_gate {
            Some(gate) => Some(Arc::clone(gate).lock_owned().await),
            None => None,
        };

        let model = Arc::clone(&self.model);
        run_blocking(move || {
            let _guard = guard;
            model.predict(input)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> std::result::Result<T, PredictionError>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, PredictionError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PredictionError::numeric(format!("inference task did not complete: {}", e)))?
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.model.name())
            .field("variant", &self.model.variant())
            .field("serialized", &self.is_serialized())
            .finish()
    }
}

type LoadAttempt =
    Shared<BoxFuture<'static, std::result::Result<Arc<dyn DetectableModel>, LoadError>>>;

enum SlotState {
    Empty,
    Loading { generation: u64, attempt: LoadAttempt },
    Ready(ModelHandle),
}

struct SlotInner {
    generation: u64,
    state: SlotState,
}

/// Cache slot for one variant
struct ModelSlot {
    variant: ModelVariant,
    factory: Arc<dyn ModelFactory>,
    serialize_inference: bool,
    metrics: MetricsCollector,
    inner: Mutex<SlotInner>,
}

impl ModelSlot {
    fn new(
        variant: ModelVariant,
        factory: Arc<dyn ModelFactory>,
        serialize_inference: bool,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            variant,
            factory,
            serialize_inference,
            metrics,
            inner: Mutex::new(SlotInner {
                generation: 0,
                state: SlotState::Empty,
            }),
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self.inner.lock().state, SlotState::Ready(_))
    }

    async fn get(&self) -> std::result::Result<ModelHandle, LoadError> {
        let (generation, attempt) = {
            let mut inner = self.inner.lock();
            match &inner.state {
                SlotState::Ready(handle) => return Ok(handle.clone()),
                SlotState::Loading {
                    generation,
                    attempt,
                } => (*generation, attempt.clone()),
                SlotState::Empty => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let attempt = self.start_load();
                    inner.state = SlotState::Loading {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let outcome = attempt.await;

        // The first waiter back settles the slot; the rest observe the result.
        let mut inner = self.inner.lock();
        let settling = matches!(
            &inner.state,
            SlotState::Loading { generation: g, .. } if *g == generation
        );

        match outcome {
            Ok(model) => {
                if settling {
                    let handle = ModelHandle::new(model, self.serialize_inference);
                    inner.state = SlotState::Ready(handle.clone());
                    self.metrics.record_load(self.variant, true);
                    return Ok(handle);
                }
                match &inner.state {
                    SlotState::Ready(handle) => Ok(handle.clone()),
                    _ => Ok(ModelHandle::new(model, self.serialize_inference)),
                }
            }
            Err(e) => {
                if settling {
                    inner.state = SlotState::Empty;
                    self.metrics.record_load(self.variant, false);
                    warn!(variant = %self.variant, error = %e, "Model load failed; will retry on next request");
                }
                Err(e)
            }
        }
    }

    fn start_load(&self) -> LoadAttempt {
        let factory = Arc::clone(&self.factory);
        let variant = self.variant;

        async move {
            let start = Instant::now();
            let joined = tokio::task::spawn_blocking(move || {
                let mut model = factory.create();
                model.load()?;
                Ok::<_, LoadError>(model)
            })
            .await;

            match joined {
                Ok(Ok(model)) => {
                    info!(
                        variant = %variant,
                        model = %model.name(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Model loaded"
                    );
                    Ok(Arc::<dyn DetectableModel>::from(model))
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(LoadError::Failed(format!("load task did not complete: {}", e))),
            }
        }
        .boxed()
        .shared()
    }
}

/// Process-wide cache of loaded models, one slot per variant.
///
/// Meant to be created once and shared behind an `Arc`.
pub struct ModelManager {
    tabular: ModelSlot,
    image: ModelSlot,
}

impl ModelManager {
    /// Create a manager from the two variant factories
    pub fn new(tabular: Arc<dyn ModelFactory>, image: Arc<dyn ModelFactory>) -> Self {
        ModelManagerBuilder::new()
            .with_tabular_factory(tabular)
            .with_image_factory(image)
            .assemble()
    }

    pub fn builder() -> ModelManagerBuilder {
        ModelManagerBuilder::new()
    }

    /// Wire the heart disease and brain tumor models described by `config`.
    ///
    /// Fails when `config` does not pass [`GatewayConfig::validate`].
    pub fn from_config(config: &GatewayConfig, metrics: MetricsCollector) -> Result<Self> {
        config.validate()?;

        let tabular_config = config.models.tabular.clone();
        let image_config = config.models.image.clone();
        let max_dimension = config.limits.max_image_dimension;

        Ok(ModelManagerBuilder::new()
            .with_tabular_factory(Arc::new(move || {
                Box::new(HeartDiseaseModel::new(
                    &tabular_config,
                    TabularSchema::heart_disease(),
                )) as Box<dyn DetectableModel>
            }))
            .with_image_factory(Arc::new(move || {
                Box::new(BrainTumorModel::new(&image_config, max_dimension))
                    as Box<dyn DetectableModel>
            }))
            .serialize_inference(ModelVariant::Tabular, config.models.tabular.serialize_inference)
            .serialize_inference(ModelVariant::Image, config.models.image.serialize_inference)
            .with_metrics(metrics)
            .assemble())
    }

    fn slot(&self, variant: ModelVariant) -> &ModelSlot {
        match variant {
            ModelVariant::Tabular => &self.tabular,
            ModelVariant::Image => &self.image,
        }
    }

    /// Get the tabular model, loading it on first access
    pub async fn get_tabular_model(&self) -> std::result::Result<ModelHandle, LoadError> {
        self.tabular.get().await
    }

    /// Get the image model, loading it on first access
    pub async fn get_image_model(&self) -> std::result::Result<ModelHandle, LoadError> {
        self.image.get().await
    }

    pub async fn get(&self, variant: ModelVariant) -> std::result::Result<ModelHandle, LoadError> {
        self.slot(variant).get().await
    }

    /// Whether `variant` has a loaded instance cached
    pub fn is_cached(&self, variant: ModelVariant) -> bool {
        self.slot(variant).is_ready()
    }

    /// Load every variant concurrently; one failure does not stop the others
    pub async fn preload(&self) -> Vec<(ModelVariant, std::result::Result<(), LoadError>)> {
        let (tabular, image) = tokio::join!(self.tabular.get(), self.image.get());

        vec![
            (ModelVariant::Tabular, tabular.map(|_| ())),
            (ModelVariant::Image, image.map(|_| ())),
        ]
    }
}

/// Builder for [`ModelManager`]
pub struct ModelManagerBuilder {
    tabular: Option<Arc<dyn ModelFactory>>,
    image: Option<Arc<dyn ModelFactory>>,
    serialize_tabular: bool,
    serialize_image: bool,
    metrics: MetricsCollector,
}

impl ModelManagerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            tabular: None,
            image: None,
            serialize_tabular: false,
            serialize_image: false,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_tabular_factory(mut self, factory: Arc<dyn ModelFactory>) -> Self {
        self.tabular = Some(factory);
        self
    }

    pub fn with_image_factory(mut self, factory: Arc<dyn ModelFactory>) -> Self {
        self.image = Some(factory);
        self
    }

    /// Force inference on `variant` through a per-variant lock
    pub fn serialize_inference(mut self, variant: ModelVariant, serialize: bool) -> Self {
        match variant {
            ModelVariant::Tabular => self.serialize_tabular = serialize,
            ModelVariant::Image => self.serialize_image = serialize,
        }
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the manager; both factories are required
    pub fn build(self) -> Result<ModelManager> {
        if self.tabular.is_none() {
            return Err(Error::config("no tabular model factory registered"));
        }
        if self.image.is_none() {
            return Err(Error::config("no image model factory registered"));
        }
        Ok(self.assemble())
    }

    pub(crate) fn assemble(self) -> ModelManager {
        let tabular = self
            .tabular
            .unwrap_or_else(|| Arc::new(unavailable(ModelVariant::Tabular)) as Arc<dyn ModelFactory>);
        let image = self
            .image
            .unwrap_or_else(|| Arc::new(unavailable(ModelVariant::Image)) as Arc<dyn ModelFactory>);

        ModelManager {
            tabular: ModelSlot::new(
                ModelVariant::Tabular,
                tabular,
                self.serialize_tabular,
                self.metrics.clone(),
            ),
            image: ModelSlot::new(ModelVariant::Image, image, self.serialize_image, self.metrics),
        }
    }
}

impl Default for ModelManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for a variant nobody registered; every load fails.
fn unavailable(variant: ModelVariant) -> impl Fn() -> Box<dyn DetectableModel> + Send + Sync {
    move || Box::new(Unavailable { variant }) as Box<dyn DetectableModel>
}

struct Unavailable {
    variant: ModelVariant,
}

impl DetectableModel for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn variant(&self) -> ModelVariant {
        self.variant
    }

    fn artifact_path(&self) -> &std::path::Path {
        std::path::Path::new("")
    }

    fn is_loaded(&self) -> bool {
        false
    }

    fn load(&mut self) -> std::result::Result<(), LoadError> {
        Err(LoadError::Failed(format!(
            "no {} model is configured",
            self.variant.display_name()
        )))
    }

    fn classes(&self) -> &[String] {
        &[]
    }

    fn preprocess(&self, _input: ModelInput<'_>) -> std::result::Result<NormalizedInput, PredictionError> {
        Err(PredictionError::NotLoaded(self.name().to_string()))
    }

    fn predict(&self, _input: NormalizedInput) -> std::result::Result<PredictionResult, PredictionError> {
        Err(PredictionError::NotLoaded(self.name().to_string()))
    }
}
