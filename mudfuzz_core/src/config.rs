use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// Every variant is fatal and surfaces before the first tick.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON from config file {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid regular expression for '{field}': {source}")]
    InvalidPattern {
        field: &'static str,
        source: regex::Error,
    },
    #[error("No fuzz command registered under '{0}'")]
    UnknownCommand(String),
    #[error("Weight for fuzz command '{command}' must be a finite, non-negative number (got {weight})")]
    InvalidWeight { command: String, weight: f64 },
    #[error("Fuzz command weights must sum to a finite number (got {total})")]
    WeightOverflow { total: f64 },
    #[error("Invalid fuzz command weight table: {0}")]
    Weights(#[from] rand::distr::weighted::Error),
    #[error("Failed to load vocabulary terms from {path:?}: {source}")]
    Terms {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl ConnectionSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

fn default_read_timeout_ms() -> u64 {
    100
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LoginSettings {
    pub user: String,
    pub password: String,
    pub user_prompt: String,
    pub password_prompt: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DetectionSettings {
    pub error_pattern: String,
    #[serde(default)]
    pub error_pause: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_reads_per_tick")]
    pub max_reads_per_tick: usize,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FuzzerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

pub fn default_tick_interval_ms() -> u64 {
    100
}
pub fn default_max_reads_per_tick() -> usize {
    100
}
pub fn default_memory_capacity() -> usize {
    crate::corpus::DEFAULT_MEMORY_CAPACITY
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_reads_per_tick: default_max_reads_per_tick(),
            memory_capacity: default_memory_capacity(),
            seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct VocabularySettings {
    #[serde(default)]
    pub valid_commands: Vec<String>,
    #[serde(default)]
    pub valid_words: Vec<String>,
    /// Directory of term files: one category per file, one term per line.
    #[serde(default)]
    pub terms_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MudfuzzConfig {
    pub connection: ConnectionSettings,
    pub login: LoginSettings,
    pub detection: DetectionSettings,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    /// Command identifier to selection weight.
    #[serde(default)]
    pub fuzz_cmds: BTreeMap<String, f64>,
    #[serde(default)]
    pub vocabulary: VocabularySettings,
}

impl MudfuzzConfig {
    /// Loads a config file. Files ending in `.json` are parsed as JSON, anything else as TOML.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            Self::from_toml_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}
