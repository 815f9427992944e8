//! Configuration for the waypoint core.
//!
//! Read from a TOML file or constructed in code; every field has a
//! sensible default so a minimal file (or none at all) works.
//!
//! # Configuration File Format
//!
//! ```toml
//! checkpoint_dir = ".waypoint/checkpoints"
//! max_attempts_per_stage = 3
//! skippable_stages = ["lint", "docs"]
//! advisor_endpoint = "http://localhost:8700/advise"
//! advisor_timeout_secs = 30
//!
//! [default_policy]
//! artifact_url = ""
//! review_verdict = "approve"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointConfig {
    /// Directory holding one JSON checkpoint record per run.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Maximum execution attempts per stage before retry stops applying.
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_stage: u32,

    /// Stages that may be skipped by the supervisor without failing the
    /// run. Empty by default: skipping is opt-in per stage.
    #[serde(default)]
    pub skippable_stages: Vec<String>,

    /// Field name → safe default value for the defaulting strategy.
    /// Fields absent from this table are never defaulted.
    #[serde(default)]
    pub default_policy: HashMap<String, serde_json::Value>,

    /// Advisory reasoning service endpoint. When unset, consultation is
    /// treated as unavailable and recovery goes straight to the
    /// retry/default/skip chain.
    #[serde(default)]
    pub advisor_endpoint: Option<String>,

    /// Upper bound on a single advisory consultation.
    #[serde(default = "default_advisor_timeout_secs")]
    pub advisor_timeout_secs: u64,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".waypoint/checkpoints")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_advisor_timeout_secs() -> u64 {
    30
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            max_attempts_per_stage: default_max_attempts(),
            skippable_stages: Vec::new(),
            default_policy: HashMap::new(),
            advisor_endpoint: None,
            advisor_timeout_secs: default_advisor_timeout_secs(),
        }
    }
}

impl WaypointConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: WaypointConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_secs(self.advisor_timeout_secs)
    }
}
