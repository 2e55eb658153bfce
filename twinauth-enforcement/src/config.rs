//! Enforcement configuration
//!
//! One file configures the whole enforcement core. Every section is optional
//! and falls back to its defaults:
//!
//! ```toml
//! blocked-namespaces = ["org.suspended"]
//!
//! [ask-with-retry]
//! ask-timeout-ms = 5000
//! retry-strategy = "backoff-delay"
//! retry-attempts = 3
//!
//! [policy-cache]
//! maximum-size = 20000
//! expire-after-access-ms = 3600000
//!
//! [policy-enforcer-provider]
//! kind = "caching"
//!
//! [[creation-restriction.grant]]
//! resource-types = ["thing"]
//! auth-subjects = ["issuer:.*"]
//! ```

use crate::creation::{CreationRestrictionConfig, CreationRestrictionEnforcer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use twinauth_ask::AskWithRetryConfig;
use twinauth_core::{EnforcementError, Result};
use twinauth_policy::{CacheConfig, PolicyEnforcerProviderConfig};

/// Top-level configuration of the enforcement core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EnforcementConfig {
    pub ask_with_retry: AskWithRetryConfig,
    pub policy_cache: CacheConfig,
    pub policy_enforcer_provider: PolicyEnforcerProviderConfig,
    pub creation_restriction: CreationRestrictionConfig,
    /// Namespaces blocked at startup
    pub blocked_namespaces: Vec<String>,
    /// Capacity of the policy cache event channel
    pub event_buffer_size: usize,
}

/// Errors from config file loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
}

impl From<ConfigFileError> for EnforcementError {
    fn from(e: ConfigFileError) -> Self {
        EnforcementError::Config(e.to_string())
    }
}

impl EnforcementConfig {
    pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

    /// Parse and validate TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EnforcementError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file. `.json` files are parsed as JSON,
    /// everything else as TOML. An empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = read_config_file(path)?;
        config.validate()?;
        info!(path = %path.display(), "enforcement configuration loaded");
        Ok(config)
    }

    /// Reject configuration that could only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        self.ask_with_retry.validate()?;
        self.policy_cache.validate()?;
        CreationRestrictionEnforcer::new(&self.creation_restriction)?;
        if let Some(bad) = self
            .blocked_namespaces
            .iter()
            .find(|ns| ns.is_empty() || ns.contains(char::is_whitespace))
        {
            return Err(EnforcementError::config(format!(
                "blocked-namespaces contains an invalid namespace '{bad}'"
            )));
        }
        Ok(())
    }

    /// Event channel capacity, never zero
    pub fn event_buffer_size(&self) -> usize {
        if self.event_buffer_size == 0 {
            Self::DEFAULT_EVENT_BUFFER_SIZE
        } else {
            self.event_buffer_size
        }
    }
}

fn read_config_file(path: &Path) -> std::result::Result<EnforcementConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if content.trim().is_empty() {
        return Ok(EnforcementConfig::default());
    }

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    } else {
        toml::from_str(&content).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}
