//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::query::{ExecutorOptions, OutputFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where machine records come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Built-in sample fleet
    #[default]
    Sample,
    /// Randomly generated fleet
    Generated,
    Json,
    Csv,
}

impl SourceKind {
    /// Guess a file source from the path extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample => write!(f, "sample"),
            Self::Generated => write!(f, "generated"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sample" => Ok(Self::Sample),
            "generated" | "generate" => Ok(Self::Generated),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ConfigError::Invalid {
                key: "source.kind".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Record source configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// File to read for `json` and `csv` sources
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Machines to create for the `generated` source
    #[serde(default = "default_generated_count")]
    pub count: usize,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Append the edge-case scenario machines to a generated fleet
    #[serde(default)]
    pub scenarios: bool,
}

fn default_generated_count() -> usize {
    500
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            path: None,
            count: default_generated_count(),
            seed: None,
            scenarios: false,
        }
    }
}

/// Query executor limits
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_timeout_ms() -> u64 {
    5000 // 5 seconds
}

fn default_max_rows() -> usize {
    10_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_rows: default_max_rows(),
        }
    }
}

impl ExecutorConfig {
    /// Executor options with these limits and the given output format
    pub fn options(&self, format: OutputFormat) -> ExecutorOptions {
        ExecutorOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_rows: self.max_rows,
            format,
            explain_only: false,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_parsed_max_entries")]
    pub parsed_max_entries: usize,

    #[serde(default = "default_parsed_ttl")]
    pub parsed_ttl_secs: u64,

    #[serde(default = "default_result_max_entries")]
    pub result_max_entries: usize,

    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_parsed_max_entries() -> usize {
    500
}

fn default_parsed_ttl() -> u64 {
    3600 // 1 hour
}

fn default_result_max_entries() -> usize {
    100
}

fn default_result_ttl() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            parsed_max_entries: default_parsed_max_entries(),
            parsed_ttl_secs: default_parsed_ttl(),
            result_max_entries: default_result_max_entries(),
            result_ttl_secs: default_result_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fleetquery").join("config.toml")),
            Some(PathBuf::from("/etc/fleetquery/config.toml")),
            Some(PathBuf::from("./fleetquery.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup. Unparseable values are logged
    /// and ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Source overrides
        if let Some(kind) = var("FLEETQUERY_SOURCE") {
            match kind.parse() {
                Ok(kind) => self.source.kind = kind,
                Err(e) => tracing::warn!("Ignoring FLEETQUERY_SOURCE: {}", e),
            }
        }
        if let Some(path) = var("FLEETQUERY_DATA_PATH") {
            let path = PathBuf::from(path);
            if let Some(kind) = SourceKind::from_path(&path) {
                self.source.kind = kind;
            }
            self.source.path = Some(path);
        }

        // Cache overrides
        if let Some(enabled) = var("FLEETQUERY_CACHE_ENABLED") {
            match enabled.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.cache.enabled = true,
                "0" | "false" | "no" | "off" => self.cache.enabled = false,
                other => tracing::warn!("Ignoring FLEETQUERY_CACHE_ENABLED={}", other),
            }
        }

        // Executor overrides
        if let Some(timeout) = var("FLEETQUERY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.trim().parse() {
                self.executor.timeout_ms = ms;
            }
        }
        if let Some(max_rows) = var("FLEETQUERY_MAX_ROWS") {
            if let Ok(n) = max_rows.trim().parse() {
                self.executor.max_rows = n;
            }
        }

        // Logging overrides
        if let Some(level) = var("FLEETQUERY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("FLEETQUERY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# fleetquery Configuration
#
# Environment variables override these settings:
# - FLEETQUERY_SOURCE
# - FLEETQUERY_DATA_PATH
# - FLEETQUERY_CACHE_ENABLED
# - FLEETQUERY_TIMEOUT_MS
# - FLEETQUERY_MAX_ROWS
# - FLEETQUERY_LOG_LEVEL
# - FLEETQUERY_LOG_FORMAT

[source]
# Record source: sample, generated, json or csv
kind = "sample"

# File to read for json and csv sources
# path = "/var/lib/fleetquery/machines.json"

# Number of machines for the generated source
count = 500

# Fixed seed for reproducible generated fleets
# seed = 42

# Append edge-case scenario machines to generated fleets
scenarios = false

[executor]
# Wall-clock budget per query (ms), 0 disables
timeout_ms = 5000

# Largest result allowed, 0 disables
max_rows = 10000

[cache]
# Enable parsed-query and result caching
enabled = true

# Parsed query cache
parsed_max_entries = 500
parsed_ttl_secs = 3600

# Result cache
result_max_entries = 100
result_ttl_secs = 60

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[source]\nkind = \"generated\"\ncount = 50\nseed = 9").unwrap();
        writeln!(file, "[cache]\nenabled = false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.source.kind, SourceKind::Generated);
        assert_eq!(config.source.count, 50);
        assert_eq!(config.source.seed, Some(9));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.result_ttl_secs, 60);
        assert_eq!(config.executor.timeout_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/fleetquery.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[source]\nkind = \"ftp\"").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("FLEETQUERY_DATA_PATH", "/tmp/machines.csv"),
            ("FLEETQUERY_CACHE_ENABLED", "off"),
            ("FLEETQUERY_TIMEOUT_MS", "250"),
            ("FLEETQUERY_MAX_ROWS", "not-a-number"),
            ("FLEETQUERY_LOG_FORMAT", "json"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.source.kind, SourceKind::Csv);
        assert_eq!(config.source.path, Some(PathBuf::from("/tmp/machines.csv")));
        assert!(!config.cache.enabled);
        assert_eq!(config.executor.timeout_ms, 250);
        assert_eq!(config.executor.max_rows, 10_000);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_source_kind() {
        assert_eq!("Generated".parse::<SourceKind>().unwrap(), SourceKind::Generated);
        assert!("ftp".parse::<SourceKind>().is_err());
        assert_eq!(SourceKind::from_path(Path::new("fleet.JSON")), Some(SourceKind::Json));
        assert_eq!(SourceKind::from_path(Path::new("fleet.txt")), None);
        assert_eq!(SourceKind::Csv.to_string(), "csv");
    }

    #[test]
    fn test_executor_options() {
        let options = ExecutorConfig::default().options(OutputFormat::Csv);
        assert_eq!(options.timeout, Duration::from_millis(5000));
        assert_eq!(options.max_rows, 10_000);
        assert_eq!(options.format, OutputFormat::Csv);
    }
}
