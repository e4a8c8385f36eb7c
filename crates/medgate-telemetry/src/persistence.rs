//! Prediction log persistence
//!
//! Provides file-based persistence for prediction records with:
//! - JSON-lines format for append-only writes
//! - Buffered writes flushed every `flush_interval` records
//! - Per-user history queries

use async_trait::async_trait;
use medgate_core::{ModelVariant, PredictionRecord, PredictionSink, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration for prediction log persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Write records at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON-lines file receiving the records
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Flush to disk after this many records
    #[serde(default = "default_flush_interval")]
    pub flush_interval: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_log_path(),
            flush_interval: default_flush_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> PathBuf {
    PathBuf::from("./data/predictions.jsonl")
}

fn default_flush_interval() -> usize {
    1
}

/// Filter for reading back prediction records
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub user_id: Option<i64>,
    pub variant: Option<ModelVariant>,
    /// Most recent N records after filtering
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn variant(mut self, variant: ModelVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &PredictionRecord) -> bool {
        if let Some(user_id) = self.user_id {
            if record.user_id != user_id {
                return false;
            }
        }
        if let Some(variant) = self.variant {
            if record.model_variant != variant {
                return false;
            }
        }
        true
    }
}

struct LogWriter {
    file: BufWriter<File>,
    since_flush: usize,
}

/// Append-only JSON-lines prediction log
pub struct JsonlPredictionLog {
    config: PersistenceConfig,
    writer: Mutex<LogWriter>,
}

impl JsonlPredictionLog {
    /// Open (or create) the log file named in `config`
    pub fn open(config: PersistenceConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        info!("Prediction log opened at {}", config.path.display());

        Ok(Self {
            writer: Mutex::new(LogWriter {
                file: BufWriter::new(file),
                since_flush: 0,
            }),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Append one record
    pub fn append(&self, record: &PredictionRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;

        let mut writer = self.writer.lock();
        writer.file.write_all(line.as_bytes())?;
        writer.file.write_all(b"\n")?;
        writer.since_flush += 1;

        if writer.since_flush >= self.config.flush_interval.max(1) {
            writer.file.flush()?;
            writer.since_flush = 0;
        }

        debug!(id = %record.id, variant = %record.model_variant, "prediction record written");
        Ok(())
    }

    /// Force flush to disk
    pub fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;
        writer.since_flush = 0;
        Ok(())
    }

    /// Read back records matching `query`, oldest first
    pub fn query(&self, query: &HistoryQuery) -> Result<Vec<PredictionRecord>> {
        self.flush()?;

        let file = File::open(&self.config.path)?;
        let mut records = Vec::new();

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<PredictionRecord>(&line) {
                Ok(record) if query.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed prediction record at line {}: {}", line_no + 1, e),
            }
        }

        if let Some(limit) = query.limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }

        Ok(records)
    }

    /// All records of one user, oldest first
    pub fn history(&self, user_id: i64) -> Result<Vec<PredictionRecord>> {
        self.query(&HistoryQuery::new().user(user_id))
    }

    /// The last `limit` records across all users
    pub fn recent(&self, limit: usize) -> Result<Vec<PredictionRecord>> {
        self.query(&HistoryQuery::new().limit(limit))
    }
}

#[async_trait]
impl PredictionSink for JsonlPredictionLog {
    async fn record(&self, record: &PredictionRecord) -> Result<String> {
        self.append(record)?;
        Ok(record.id.clone())
    }
}

/// In-memory sink, for tests and embedding
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<PredictionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PredictionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl PredictionSink for MemorySink {
    async fn record(&self, record: &PredictionRecord) -> Result<String> {
        self.records.lock().push(record.clone());
        Ok(record.id.clone())
    }
}
