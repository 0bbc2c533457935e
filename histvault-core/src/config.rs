//! Client configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! base_url = "https://data.binance.vision"
//! cache_dir = ".cache"
//! timeout_secs = 30
//! max_attempts = 3
//! backoff_base_ms = 1000
//! workers = 8
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::cache::DEFAULT_CACHE_DIR;
use crate::data::fetcher::RetryPolicy;
use crate::data::provider::FetchError;
use crate::data::url::DEFAULT_BASE_URL;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub base_url: String,
    pub cache_dir: PathBuf,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Total attempts per archive in concurrent mode.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Worker threads for concurrent requests.
    pub workers: usize,
    pub user_agent: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 1000,
            workers: 8,
            user_agent: concat!("histvault/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl VaultConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, FetchError> {
        let config: Self =
            toml::from_str(content).map_err(|e| FetchError::Config(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(FetchError::Config(format!(
                "base_url '{}' is not a URL",
                self.base_url
            )));
        }
        if self.max_attempts == 0 {
            return Err(FetchError::Config("max_attempts must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(FetchError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
        }
    }
}
