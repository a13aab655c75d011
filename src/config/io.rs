//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        debug!("Loading config from {}", config_path.display());
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // JSON5 is a superset of JSON and tolerates comments
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have the
/// highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Overlay values produced by `lookup` onto `config`. Unparseable values are
/// logged and skipped.
pub(crate) fn apply_overrides_from<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Server overrides
    if let Some(bind) = lookup("RUNNER_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("RUNNER_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!("Ignoring invalid RUNNER_PORT: {}", port),
        }
    }

    // Runner overrides
    if let Some(interpreter) = lookup("RUNNER_INTERPRETER") {
        config.runner.interpreter = PathBuf::from(interpreter);
    }
    if let Some(timeout) = lookup("RUNNER_TIMEOUT") {
        match humantime::parse_duration(&timeout) {
            Ok(v) => config.runner.timeout = v,
            Err(e) => warn!("Ignoring invalid RUNNER_TIMEOUT {:?}: {}", timeout, e),
        }
    }
    if let Some(max) = lookup("RUNNER_MAX_OUTPUT_BYTES") {
        match max.parse() {
            Ok(v) => config.runner.max_output_bytes = v,
            Err(_) => warn!("Ignoring invalid RUNNER_MAX_OUTPUT_BYTES: {}", max),
        }
    }
    if let Some(max) = lookup("RUNNER_MAX_CONCURRENT") {
        match max.parse() {
            Ok(v) => config.runner.max_concurrent = v,
            Err(_) => warn!("Ignoring invalid RUNNER_MAX_CONCURRENT: {}", max),
        }
    }
    if let Some(dir) = lookup("RUNNER_WORKING_DIR") {
        config.runner.working_dir = Some(PathBuf::from(dir));
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
