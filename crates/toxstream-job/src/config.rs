//! Job configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toxstream_core::FixedWindows;
use toxstream_pipeline::{PipelineConfig, DEFAULT_KEY_ATTRIBUTE};

/// Job configuration, loaded from YAML with CLI overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Fixed window size for the join stage, in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Capacity of the inter-stage channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Message attribute holding the partition key
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,

    /// Toxicity thresholds for the flagged branches
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Local file the table rows are appended to
    #[serde(default = "default_table_path")]
    pub table_path: String,

    /// Port the Prometheus exporter listens on
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl JobConfig {
    /// Load configuration from file and apply CLI overrides.
    pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Some(window_ms) = cli.window_ms {
            config.window_ms = window_ms;
        }

        Ok(config)
    }

    /// Derive the pipeline tunables from this config
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            windows: FixedWindows::new(Duration::from_millis(self.window_ms)),
            channel_capacity: self.channel_capacity,
            key_attribute: self.key_attribute.clone(),
            gaming_threshold: self.thresholds.gaming,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            channel_capacity: default_channel_capacity(),
            key_attribute: default_key_attribute(),
            thresholds: Thresholds::default(),
            table_path: default_table_path(),
            metrics_port: default_metrics_port(),
        }
    }
}

/// Score thresholds for the flagged branches.
///
/// Only the gaming branch is flagged and routed; its threshold is a
/// placeholder to be calibrated against the deployed model's score
/// distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_gaming_threshold")]
    pub gaming: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            gaming: default_gaming_threshold(),
        }
    }
}

fn default_window_ms() -> u64 {
    100
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_key_attribute() -> String {
    DEFAULT_KEY_ATTRIBUTE.to_string()
}

fn default_table_path() -> String {
    "./tox_rows.jsonl".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_gaming_threshold() -> f32 {
    toxstream_models::DEFAULT_GAMING_THRESHOLD
}
