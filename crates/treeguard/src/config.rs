use anyhow::Context;
use rule_engine::{GateOptions, LoadOptions, DEFAULT_TOKEN_PARAM};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
    #[serde(default = "default_token_param")]
    pub token_param: String,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
            token_param: default_token_param(),
            strict: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn gate_options(&self) -> GateOptions {
        GateOptions {
            token_param: self.token_param.clone(),
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            strict: self.strict,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit log lines as JSON objects
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_rules_file() -> PathBuf {
    PathBuf::from("rules.yaml")
}

fn default_token_param() -> String {
    DEFAULT_TOKEN_PARAM.to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted, so the tool works without any config file.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}
