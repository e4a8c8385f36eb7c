//! Model manager caching and load-coordination tests

mod common;

use common::{init_tracing, DoubleSpec};
use medgate_core::{LoadError, ModelVariant};
use medgate_models::{GatewayConfig, ModelManager, NormalizedInput};
use medgate_telemetry::MetricsCollector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn missing() -> LoadError {
    LoadError::Missing {
        path: PathBuf::from("models/heart_model.json"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_load_once() {
    init_tracing();
    let (tabular, counters) = DoubleSpec::tabular()
        .with_load_delay(Duration::from_millis(50))
        .factory();
    let (image, _) = DoubleSpec::image().factory();
    let manager = Arc::new(ModelManager::new(tabular, image));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_tabular_model().await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(counters.loads(), 1);
    assert!(handles.iter().all(|h| h.same_instance(&handles[0])));
    assert!(manager.is_cached(ModelVariant::Tabular));
    assert!(!manager.is_cached(ModelVariant::Image));
}

#[tokio::test]
async fn test_cached_instance_returned_unchanged() {
    let (tabular, counters) = DoubleSpec::tabular().factory();
    let (image, _) = DoubleSpec::image().factory();
    let manager = ModelManager::new(tabular, image);

    let first = manager.get(ModelVariant::Tabular).await.unwrap();
    let second = manager.get_tabular_model().await.unwrap();

    assert!(first.same_instance(&second));
    assert_eq!(counters.loads(), 1);
    assert_eq!(first.variant(), ModelVariant::Tabular);
}

#[tokio::test]
async fn test_failed_load_is_not_cached() {
    let (tabular, counters) = DoubleSpec::tabular().failing_times(missing(), 2).factory();
    let (image, _) = DoubleSpec::image().factory();
    let manager = ModelManager::new(tabular, image);

    assert_eq!(manager.get_tabular_model().await.unwrap_err(), missing());
    assert!(!manager.is_cached(ModelVariant::Tabular));
    assert_eq!(manager.get_tabular_model().await.unwrap_err(), missing());

    // Third attempt succeeds once the artifact "appears"
    manager.get_tabular_model().await.unwrap();
    assert_eq!(counters.loads(), 3);
    assert!(manager.is_cached(ModelVariant::Tabular));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_share_failed_attempt() {
    let error = LoadError::corrupt("models/brain_tumor.safetensors", "truncated header");
    let (tabular, _) = DoubleSpec::tabular().factory();
    let (image, counters) = DoubleSpec::image()
        .with_load_delay(Duration::from_millis(100))
        .failing(error.clone())
        .factory();
    let manager = Arc::new(ModelManager::new(tabular, image));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_image_model().await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap_err(), error);
    }
    assert_eq!(counters.loads(), 1);

    // Nothing cached, so the next request starts a new attempt
    assert!(manager.get_image_model().await.is_err());
    assert_eq!(counters.loads(), 2);
}

#[tokio::test]
async fn test_preload_reports_each_variant() {
    let (tabular, _) = DoubleSpec::tabular().factory();
    let (image, _) = DoubleSpec::image().failing(missing()).factory();
    let metrics = MetricsCollector::new();
    let manager = ModelManager::builder()
        .with_tabular_factory(tabular)
        .with_image_factory(image)
        .with_metrics(metrics.clone())
        .build()
        .unwrap();

    let outcomes = manager.preload().await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], (ModelVariant::Tabular, Ok(())));
    assert_eq!(outcomes[1], (ModelVariant::Image, Err(missing())));
    assert!(manager.is_cached(ModelVariant::Tabular));
    assert!(!manager.is_cached(ModelVariant::Image));

    assert_eq!(metrics.snapshot(ModelVariant::Tabular).loads, 1);
    assert_eq!(metrics.snapshot(ModelVariant::Image).load_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serialized_inference() {
    let (tabular, counters) = DoubleSpec::tabular()
        .with_predict_delay(Duration::from_millis(20))
        .factory();
    let (image, _) = DoubleSpec::image().factory();
    let manager = ModelManager::builder()
        .with_tabular_factory(tabular)
        .with_image_factory(image)
        .serialize_inference(ModelVariant::Tabular, true)
        .build()
        .unwrap();

    let handle = manager.get_tabular_model().await.unwrap();
    assert!(handle.is_serialized());

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .predict(NormalizedInput::Features(vec![0.0; 13]))
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().label, "High Risk");
    }

    assert_eq!(counters.predictions(), 6);
    assert_eq!(counters.max_in_flight(), 1);
}

#[tokio::test]
async fn test_single_threaded_model_gets_gate() {
    let (tabular, _) = DoubleSpec::tabular().factory();
    let (image, _) = DoubleSpec::image().single_threaded().factory();
    let manager = ModelManager::new(tabular, image);

    assert!(!manager.get_tabular_model().await.unwrap().is_serialized());
    assert!(manager.get_image_model().await.unwrap().is_serialized());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_prediction_keeps_gate_until_done() {
    init_tracing();
    let (tabular, counters) = DoubleSpec::tabular()
        .with_predict_delay(Duration::from_millis(100))
        .single_threaded()
        .factory();
    let (image, _) = DoubleSpec::image().factory();
    let manager = ModelManager::new(tabular, image);
    let handle = manager.get_tabular_model().await.unwrap();

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .predict(NormalizedInput::Features(vec![0.0; 13]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.abort();

    let second = handle
        .predict(NormalizedInput::Features(vec![0.0; 13]))
        .await
        .unwrap();

    assert_eq!(second.label, "High Risk");
    assert_eq!(counters.predictions(), 2);
    assert_eq!(counters.max_in_flight(), 1);
}

#[test]
fn test_from_config_rejects_invalid_config() {
    let mut config = GatewayConfig::default();
    config.models.image.input.channels = 2;

    assert!(ModelManager::from_config(&config, MetricsCollector::new()).is_err());
    assert!(ModelManager::from_config(&GatewayConfig::default(), MetricsCollector::new()).is_ok());
}

#[test]
fn test_builder_requires_both_factories() {
    let (tabular, _) = DoubleSpec::tabular().factory();
    let result = ModelManager::builder().with_tabular_factory(tabular).build();
    assert!(result.is_err());
}
