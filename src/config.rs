//! Runtime configuration.
//!
//! Configuration is layered with `figment`, lowest priority first:
//! built-in defaults, `affinity.toml`, `affinity.yaml`, then `WORKER_AFFINITY_*`
//! environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::config::{ENV_PREFIX, TOML_FILE, YAML_FILE};
use crate::error::{AffinityError, Result};
use crate::platform::detection::TopologySourceKind;
use crate::platform::topology::MalformedRecordPolicy;
use crate::reliability::TracingConfig;

fn default_cpu_pin() -> bool { true }
fn default_log_level() -> String { "info".to_string() }

/// Engine and binary configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Apply CPU affinity at all. When false `apply_affinity` is a pass-through.
    #[serde(default = "default_cpu_pin")]
    pub cpu_pin: bool,

    /// Where the CPU topology is read from
    #[serde(default)]
    pub topology_source: TopologySourceKind,

    /// lscpu-format file, required when `topology_source` is `file`
    #[serde(default)]
    pub topology_file: Option<PathBuf>,

    /// Handling of topology lines that are not four integers
    #[serde(default)]
    pub malformed_records: MalformedRecordPolicy,

    /// Log level filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Number of pinned workers the binary spawns; 0 means one per logical CPU
    #[serde(default)]
    pub workers: usize,

    /// Print Prometheus metrics on exit
    #[serde(default)]
    pub print_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_pin: default_cpu_pin(),
            topology_source: TopologySourceKind::default(),
            topology_file: None,
            malformed_records: MalformedRecordPolicy::default(),
            log_level: default_log_level(),
            log_json: false,
            workers: 0,
            print_metrics: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. affinity.yaml (if exists)
    /// 3. affinity.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Self::default_figment()
                .merge(Toml::file(TOML_FILE))
                .merge(Yaml::file(YAML_FILE))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| AffinityError::Configuration(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Built-in defaults as a figment provider.
    pub fn default_figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match (&self.topology_source, &self.topology_file) {
            (TopologySourceKind::File, None) => {
                return Err(AffinityError::Configuration(
                    "topology_source = \"file\" requires topology_file".to_string(),
                ));
            }
            (_, Some(path)) => self.validate_path(path, "topology_file")?,
            _ => {}
        }

        if self.log_level.trim().is_empty() {
            return Err(AffinityError::Configuration(
                "log_level cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Reject paths with traversal patterns, NUL bytes or control characters.
    fn validate_path(&self, path: &Path, field_name: &str) -> Result<()> {
        let path_str = path.to_string_lossy();

        if path_str.is_empty() {
            return Err(AffinityError::Configuration(format!(
                "{} cannot be empty",
                field_name
            )));
        }

        if path_str.contains("../..") {
            return Err(AffinityError::Configuration(format!(
                "{} contains potentially unsafe path components",
                field_name
            )));
        }

        if path_str.chars().any(|c| c == '\0' || (c.is_control() && c != '\t')) {
            return Err(AffinityError::Configuration(format!(
                "{} contains invalid control characters",
                field_name
            )));
        }

        if path_str.len() > 4096 {
            return Err(AffinityError::Configuration(format!(
                "{} is too long (max 4096 characters)",
                field_name
            )));
        }

        Ok(())
    }

    /// Logging settings derived from this configuration.
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            log_level: self.log_level.clone(),
            json: self.log_json,
        }
    }

    /// Export configuration to TOML format
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AffinityError::Configuration(format!("Failed to serialize to TOML: {}", e)))
    }

    /// Export configuration to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AffinityError::Configuration(format!("Failed to serialize to YAML: {}", e)))
    }
}
