//! Relay configuration.
//!
//! ```toml
//! [replay]
//! window_secs = 0
//! max_entries = 1000000
//! ordering = "after_authentication"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, SphinxError};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "P3_RELAY_CONFIG";

/// Complete relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Replay protection settings.
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// When a packet's replay tag is committed relative to header authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOrdering {
    /// Commit the tag before checking the MAC. A packet with a forged MAC
    /// still consumes the tag.
    BeforeAuthentication,
    /// Commit the tag only once the MAC has verified.
    #[default]
    AfterAuthentication,
}

/// Replay protection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Tag retention in seconds. 0 = keep forever.
    ///
    /// A non-zero window lets a packet be processed again once its tag has
    /// expired. Only set one when the relay key is rotated at least as often
    /// (see [`RelayContext::rotate_key`](crate::relay::RelayContext::rotate_key)).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Maximum number of live tags.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Tag commit ordering.
    #[serde(default)]
    pub ordering: ReplayOrdering,
}

fn default_window_secs() -> u64 {
    0
}

fn default_max_entries() -> usize {
    1_000_000
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_entries: default_max_entries(),
            ordering: ReplayOrdering::default(),
        }
    }
}

impl ReplayConfig {
    /// Retention window, `None` when tags are kept forever.
    pub fn window(&self) -> Option<Duration> {
        (self.window_secs > 0).then(|| Duration::from_secs(self.window_secs))
    }
}

impl RelayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RelayConfig =
            toml::from_str(content).map_err(|e| SphinxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SphinxError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Load from `$P3_RELAY_CONFIG`, or `./relay.toml` when unset.
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::config_path())
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| SphinxError::Config(e.to_string()))
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.replay.max_entries == 0 {
            return Err(SphinxError::Config(
                "replay.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("relay.toml"))
    }
}
