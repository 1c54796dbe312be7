//! Config file loading
//!
//! Resolution order (later wins):
//!   1. built-in defaults (`ContinuityConfig::default`)
//!   2. `config.toml` in the continuity home
//!   3. `CONTINUITY_MODEL` / `CONTINUITY_BASE_URL` environment variables
//!
//! CLI flags are applied on top by the binary.

use crate::{ContinuityConfig, ContinuityError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Partial config.toml; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub document_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub keep_recent: Option<usize>,
    pub archive_threshold: Option<usize>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub lock_timeout_ms: Option<u64>,
}

impl ConfigToml {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ContinuityError::Config(e.to_string()))
    }

    /// Overlay the values present in the file onto `config`
    pub fn apply(self, mut config: ContinuityConfig) -> ContinuityConfig {
        if let Some(path) = self.document_path {
            config = config.with_document_path(path);
        }
        if let Some(path) = self.archive_path {
            config = config.with_archive_path(path);
        }
        if let Some(keep) = self.keep_recent {
            config = config.with_keep_recent(keep);
        }
        if let Some(threshold) = self.archive_threshold {
            config = config.with_archive_threshold(threshold);
        }
        if let Some(model) = self.model {
            config = config.with_model(model);
        }
        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(env) = self.api_key_env {
            config = config.with_api_key_env(env);
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.lock_timeout_ms {
            config = config.with_lock_timeout(Duration::from_millis(ms));
        }
        config
    }
}

/// Get the continuity home directory (`$CONTINUITY_HOME` or `~/.continuity`)
pub fn continuity_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("CONTINUITY_HOME") {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| ContinuityError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".continuity"))
}

impl ContinuityConfig {
    /// Load config from an explicit file. A missing file yields defaults.
    pub async fn load_file(path: &Path) -> Result<Self> {
        let mut config = Self::default();

        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ContinuityError::Config(format!("read {}: {}", path.display(), e)))?;
            config = ConfigToml::parse(&content)?.apply(config);
            info!("Loaded config from {}", path.display());
        } else {
            debug!("No config at {}, using defaults", path.display());
        }

        Ok(config.apply_env())
    }

    /// Load config from `config.toml` in the continuity home
    pub async fn load() -> Result<Self> {
        let home = continuity_home()?;
        Self::load_file(&home.join(CONFIG_FILE_NAME)).await
    }

    fn apply_env(mut self) -> Self {
        if let Ok(model) = std::env::var("CONTINUITY_MODEL") {
            if !model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
        }
        if let Ok(base_url) = std::env::var("CONTINUITY_BASE_URL") {
            if !base_url.trim().is_empty() {
                self.base_url = base_url.trim().to_string();
            }
        }
        self
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ContinuityError::Config(format!(
                "API key not set; export {}",
                self.api_key_env
            ))),
        }
    }
}
