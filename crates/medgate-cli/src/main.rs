//! MedGate operator command line
//!
//! Runs predictions against the configured heart disease and brain tumor
//! models without the web layer, checks that both artifacts load, and reads
//! back the prediction log.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use medgate_core::{FieldValue, ModelVariant, OrchestrationError};
use medgate_models::{GatewayConfig, PredictionOrchestrator};
use medgate_telemetry::{HistoryQuery, JsonlPredictionLog, MetricsCollector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod config;

use config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "medgate")]
#[command(about = "MedGate medical inference gateway", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "medgate.yaml", env = "MEDGATE_CONFIG")]
    config: PathBuf,

    /// Prediction log file (overrides persistence.path)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Do not record predictions
    #[arg(long)]
    no_persist: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every model and report which ones are usable
    Check,

    /// Predict heart disease risk from health metrics
    Heart {
        /// Form field as name=value; repeat for each field
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, FieldValue)>,

        /// Record the prediction for this user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Classify a brain MRI scan
    Brain {
        /// Image file (PNG, JPEG or BMP)
        path: PathBuf,

        /// Content type; guessed from the file extension when absent
        #[arg(long)]
        content_type: Option<String>,

        /// Record the prediction for this user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Show recorded predictions
    History {
        /// Only this user's predictions
        #[arg(short, long)]
        user: Option<i64>,

        /// Only this model (heart_disease or brain_tumor)
        #[arg(long, value_parser = parse_variant)]
        model: Option<ModelVariant>,

        /// Most recent N records
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    describe_metrics();

    let overrides = Overrides {
        log_path: cli.log.clone(),
        no_persist: cli.no_persist,
    };
    let config = config::load(&cli.config, &overrides)?;

    match cli.command {
        Command::Check => check(&config).await,
        Command::Heart { fields, user } => heart(&config, fields, user).await,
        Command::Brain {
            path,
            content_type,
            user,
        } => brain(&config, &path, content_type, user).await,
        Command::History { user, model, limit } => history(&config, user, model, limit),
    }
}

async fn check(config: &GatewayConfig) -> Result<()> {
    let orchestrator = PredictionOrchestrator::from_config(config, MetricsCollector::new())?;

    let mut failed = 0;
    for (variant, outcome) in orchestrator.manager().preload().await {
        let report = match &outcome {
            Ok(()) => serde_json::json!({ "model": variant, "status": "ready" }),
            Err(e) => {
                failed += 1;
                serde_json::json!({ "model": variant, "status": "unavailable", "error": e.to_string() })
            }
        };
        println!("{}", report);
    }

    if failed > 0 {
        bail!("{} of {} models failed to load", failed, ModelVariant::ALL.len());
    }
    info!("All models loaded");
    Ok(())
}

async fn heart(
    config: &GatewayConfig,
    fields: Vec<(String, FieldValue)>,
    user: Option<i64>,
) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let fields: HashMap<String, FieldValue> = fields.into_iter().collect();

    let assessed = orchestrator
        .predict_tabular_for(user, &fields)
        .await
        .map_err(report)?;

    println!("{}", serde_json::to_string_pretty(&assessed)?);
    Ok(())
}

async fn brain(
    config: &GatewayConfig,
    path: &Path,
    content_type: Option<String>,
    user: Option<i64>,
) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(path).to_string());

    let assessed = orchestrator
        .predict_image_for(user, &bytes, &content_type)
        .await
        .map_err(report)?;

    println!("{}", serde_json::to_string_pretty(&assessed)?);
    Ok(())
}

fn history(
    config: &GatewayConfig,
    user: Option<i64>,
    model: Option<ModelVariant>,
    limit: usize,
) -> Result<()> {
    let log = JsonlPredictionLog::open(config.persistence.clone())?;

    let mut query = HistoryQuery::new().limit(limit);
    if let Some(user) = user {
        query = query.user(user);
    }
    if let Some(model) = model {
        query = query.variant(model);
    }

    for record in log.query(&query)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

/// Orchestrator with the prediction log attached when persistence is on
fn orchestrator(config: &GatewayConfig) -> Result<PredictionOrchestrator> {
    let orchestrator = PredictionOrchestrator::from_config(config, MetricsCollector::new())?;
    if !config.persistence.enabled {
        return Ok(orchestrator);
    }

    let log = JsonlPredictionLog::open(config.persistence.clone())
        .with_context(|| format!("opening {}", config.persistence.path.display()))?;
    Ok(orchestrator.with_sink(Arc::new(log)))
}

/// Show the user-safe message, keep the full error for the exit status
fn report(err: OrchestrationError) -> anyhow::Error {
    eprintln!("{}", err.user_message());
    warn!(stage = %err.stage, variant = %err.variant, "Prediction failed");
    anyhow::Error::new(err)
}

fn parse_field(raw: &str) -> std::result::Result<(String, FieldValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }
    Ok((name.to_string(), FieldValue::Text(value.to_string())))
}

fn parse_variant(raw: &str) -> std::result::Result<ModelVariant, String> {
    ModelVariant::ALL
        .into_iter()
        .find(|v| v.as_str() == raw)
        .ok_or_else(|| format!("unknown model '{}' (heart_disease, brain_tumor)", raw))
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("medgate=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medgate=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn describe_metrics() {
    metrics::describe_counter!(
        "medgate_predictions_total",
        "Total number of prediction requests by variant and outcome"
    );
    metrics::describe_histogram!(
        "medgate_prediction_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end prediction latency in microseconds by variant"
    );
    metrics::describe_counter!(
        "medgate_model_loads_total",
        "Model load attempts by variant and outcome"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        let (name, value) = parse_field("age=63").unwrap();
        assert_eq!(name, "age");
        assert_eq!(value, FieldValue::Text("63".to_string()));

        let (_, value) = parse_field("thal=").unwrap();
        assert_eq!(value, FieldValue::Text(String::new()));

        assert!(parse_field("age").is_err());
        assert!(parse_field("=63").is_err());
    }

    #[test]
    fn test_parse_variant() {
        assert_eq!(parse_variant("brain_tumor"), Ok(ModelVariant::Image));
        assert!(parse_variant("lungs").is_err());
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("scan.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("scan.jpeg")), "image/jpeg");
        assert_eq!(guess_content_type(Path::new("scan")), "application/octet-stream");
    }

    #[test]
    fn test_cli_parses_heart_fields() {
        let cli = Cli::try_parse_from([
            "medgate", "heart", "--field", "age=63", "-f", "sex=1", "--user", "4",
        ])
        .unwrap();

        match cli.command {
            Command::Heart { fields, user } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(user, Some(4));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
