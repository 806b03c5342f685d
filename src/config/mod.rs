//! Top-level configuration, one section per component.
//!
//! Every field has a default, so an empty document is a valid config.
//!
//! ```yaml
//! nodes:
//!   max_expanded: 4
//!   aliases:
//!     general: channels.discord.general
//! backlog:
//!   max_in_progress: 2
//!   limiters:
//!     discord: { max_concurrent: 1, min_interval_ms: 1500 }
//! cycle:
//!   max_steps: 6
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backlog::BacklogConfig;
use crate::clock::MAX_WINDOW_SECS;
use crate::controller::CycleConfig;
use crate::error::{CortexError, CortexResult};
use crate::node::NodeStoreConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    pub nodes: NodeStoreConfig,
    pub backlog: BacklogConfig,
    pub cycle: CycleConfig,
}

impl CortexConfig {
    pub fn from_yaml_str(text: &str) -> CortexResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()
    }

    pub fn from_json_str(text: &str) -> CortexResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> CortexResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(CortexError::Config(format!(
                "unsupported config file '{}': expected .yaml, .yml or .json",
                path.display()
            ))),
        }
    }

    fn validate(self) -> CortexResult<Self> {
        if self.nodes.max_expanded == 0 {
            return Err(CortexError::Config("nodes.max_expanded must be at least 1".into()));
        }
        if self.backlog.max_in_progress == 0 {
            return Err(CortexError::Config(
                "backlog.max_in_progress must be at least 1".into(),
            ));
        }
        let windows = [
            ("nodes.priority_window_secs", self.nodes.priority_window_secs),
            ("nodes.regular_window_secs", self.nodes.regular_window_secs),
            ("backlog.recent_window_secs", self.backlog.recent_window_secs),
            ("backlog.retention_secs", self.backlog.retention_secs),
        ];
        for (name, secs) in windows {
            if !(0..=MAX_WINDOW_SECS).contains(&secs) {
                return Err(CortexError::Config(format!(
                    "{name} must be between 0 and {MAX_WINDOW_SECS}, got {secs}"
                )));
            }
        }
        for (name, limiter) in &self.backlog.limiters {
            if limiter.max_concurrent == 0 {
                return Err(CortexError::Config(format!(
                    "backlog.limiters.{name}.max_concurrent must be at least 1"
                )));
            }
        }
        Ok(self)
    }
}
