//! Gateway configuration as seen by the operator binary

use medgate_models::GatewayConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Settings the command line can override on top of the config file
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Prediction log file
    pub log_path: Option<PathBuf>,

    /// Skip writing prediction records
    pub no_persist: bool,
}

/// Load configuration from file and CLI overrides
pub fn load(config_path: &Path, overrides: &Overrides) -> anyhow::Result<GatewayConfig> {
    // Try to load from file, or use defaults
    let mut config = if config_path.exists() {
        info!(path = %config_path.display(), "Loading configuration");
        GatewayConfig::from_file(config_path)?
    } else {
        debug!(path = %config_path.display(), "Config file not found, using defaults");
        GatewayConfig::default()
    };

    if let Some(path) = &overrides.log_path {
        config.persistence.path = path.clone();
    }
    if overrides.no_persist {
        config.persistence.enabled = false;
    }

    Ok(config)
}
