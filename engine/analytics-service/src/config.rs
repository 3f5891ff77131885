//! Service configuration management
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file,
//! `STREAM_ANALYTICS_*` environment variables, command-line overrides.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use stream_processor::ProcessorConfig;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "STREAM_ANALYTICS_";

/// Main service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// StreamProcessor configuration
    pub processor: ProcessorConfig,

    /// Where events are read from
    pub input: InputConfig,

    /// Where flushed snapshots go
    pub sink: SinkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Service-level settings
    pub service: ServiceSettings,
}

/// Event source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputConfig {
    /// Newline-delimited JSON on stdin
    #[default]
    Stdin,
    /// Newline-delimited JSON file
    File { path: PathBuf },
}

/// Snapshot sink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Summarise each flush in the log
    #[default]
    Log,
    /// Write each flush as a JSON file, keeping the newest `max_snapshots`
    Directory {
        path: PathBuf,
        #[serde(default = "default_max_snapshots")]
        max_snapshots: usize,
    },
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,

    /// Log format (pretty, compact, json)
    pub format: String,
}

/// Service-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// How long to wait for the consumer loop to exit on shutdown
    pub shutdown_timeout_secs: u64,

    /// How many pages/products to report at shutdown
    pub report_top_n: usize,
}

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub input: Option<InputConfig>,
    pub sink_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

fn default_max_snapshots() -> usize {
    24
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "compact".to_string() }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { shutdown_timeout_secs: 10, report_top_n: 10 }
    }
}

impl InputConfig {
    /// `-` means stdin, anything else is a file path
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            InputConfig::Stdin
        } else {
            InputConfig::File { path: PathBuf::from(arg) }
        }
    }
}

/// Load configuration from an optional file, the environment and overrides
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::debug!("Loading configuration from file: {:?}", path);
            load_from_file(path)?
        }
        None => ServiceConfig::default(),
    };

    load_from_env(&mut config, |key| std::env::var(key).ok())?;
    apply_overrides(&mut config, overrides);
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Apply `STREAM_ANALYTICS_*` variables read through `lookup`
pub fn load_from_env<F>(config: &mut ServiceConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = var("LOG_FORMAT") {
        config.logging.format = format;
    }
    if let Some(input) = var("INPUT") {
        config.input = InputConfig::from_arg(&input);
    }
    if let Some(dir) = var("SINK_DIR") {
        config.sink = SinkConfig::Directory {
            path: PathBuf::from(dir),
            max_snapshots: current_max_snapshots(&config.sink),
        };
    }
    if let Some(value) = var("MAX_SNAPSHOTS") {
        let max = parse_var::<usize>("MAX_SNAPSHOTS", &value)?;
        if let SinkConfig::Directory { max_snapshots, .. } = &mut config.sink {
            *max_snapshots = max;
        }
    }

    let processor = &mut config.processor;
    if let Some(value) = var("DEDUP_CAPACITY") {
        processor.dedup_capacity = parse_var("DEDUP_CAPACITY", &value)?;
    }
    if let Some(value) = var("FLUSH_INTERVAL_SECS") {
        processor.flush_interval_secs = parse_var("FLUSH_INTERVAL_SECS", &value)?;
    }
    if let Some(value) = var("POLL_TIMEOUT_MS") {
        processor.poll_timeout_ms = parse_var("POLL_TIMEOUT_MS", &value)?;
    }
    if let Some(value) = var("SINK_TIMEOUT_MS") {
        processor.sink_timeout_ms = parse_var("SINK_TIMEOUT_MS", &value)?;
    }
    if let Some(value) = var("RESET_AFTER_FLUSH") {
        processor.reset_after_flush = parse_var("RESET_AFTER_FLUSH", &value)?;
    }

    Ok(())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.trim().parse().with_context(|| format!("Invalid value for {ENV_PREFIX}{name}: {value:?}"))
}

fn current_max_snapshots(sink: &SinkConfig) -> usize {
    match sink {
        SinkConfig::Directory { max_snapshots, .. } => *max_snapshots,
        SinkConfig::Log => default_max_snapshots(),
    }
}

/// Apply command-line values on top of everything else
pub fn apply_overrides(config: &mut ServiceConfig, overrides: &Overrides) {
    if let Some(input) = &overrides.input {
        config.input = input.clone();
    }
    if let Some(dir) = &overrides.sink_dir {
        config.sink = SinkConfig::Directory {
            path: dir.clone(),
            max_snapshots: current_max_snapshots(&config.sink),
        };
    }
    if let Some(level) = &overrides.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &overrides.log_format {
        config.logging.format = format.clone();
    }
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    config.processor.validate().context("Invalid processor configuration")?;

    EnvFilter::try_new(&config.logging.level)
        .map_err(|e| anyhow!("Invalid log level {:?}: {}", config.logging.level, e))?;

    match config.logging.format.as_str() {
        "pretty" | "compact" | "json" => {}
        _ => return Err(anyhow!("Invalid log format: {}", config.logging.format)),
    }

    if let SinkConfig::Directory { max_snapshots: 0, .. } = config.sink {
        return Err(anyhow!("sink.max_snapshots must be greater than 0"));
    }

    if config.service.shutdown_timeout_secs == 0 {
        return Err(anyhow!("service.shutdown_timeout_secs must be greater than 0"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.input, InputConfig::Stdin);
        assert_eq!(config.sink, SinkConfig::Log);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("analytics.toml");
        std::fs::write(
            &path,
            r#"
[processor]
dedup_capacity = 500
flush_interval_secs = 30

[processor.limits]
max_queries = 100

[input]
kind = "file"
path = "/var/spool/events.jsonl"

[sink]
kind = "directory"
path = "/var/lib/analytics"

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.processor.dedup_capacity, 500);
        assert_eq!(config.processor.flush_interval_secs, 30);
        assert_eq!(config.processor.limits.max_queries, 100);
        assert_eq!(config.processor.limits.max_pages, 10_000);
        assert_eq!(config.input, InputConfig::File { path: "/var/spool/events.jsonl".into() });
        assert_eq!(
            config.sink,
            SinkConfig::Directory { path: "/var/lib/analytics".into(), max_snapshots: 24 }
        );
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = ServiceConfig::default();
        load_from_env(
            &mut config,
            env(&[
                ("LOG_LEVEL", "debug"),
                ("INPUT", "events.jsonl"),
                ("SINK_DIR", "/data/flushes"),
                ("MAX_SNAPSHOTS", "5"),
                ("FLUSH_INTERVAL_SECS", "15"),
                ("RESET_AFTER_FLUSH", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.input, InputConfig::File { path: "events.jsonl".into() });
        assert_eq!(config.sink, SinkConfig::Directory { path: "/data/flushes".into(), max_snapshots: 5 });
        assert_eq!(config.processor.flush_interval_secs, 15);
        assert!(config.processor.reset_after_flush);
    }

    #[test]
    fn test_env_rejects_unparseable_number() {
        let mut config = ServiceConfig::default();
        let result = load_from_env(&mut config, env(&[("DEDUP_CAPACITY", "lots")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = ServiceConfig::default();
        load_from_env(&mut config, env(&[("LOG_FORMAT", "json"), ("INPUT", "a.jsonl")])).unwrap();

        let overrides = Overrides {
            input: Some(InputConfig::from_arg("-")),
            log_format: Some("pretty".to_string()),
            ..Default::default()
        };
        apply_overrides(&mut config, &overrides);

        assert_eq!(config.input, InputConfig::Stdin);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ServiceConfig::default();
        config.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = ServiceConfig::default();
        config.processor.flush_interval_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ServiceConfig::default();
        config.sink = SinkConfig::Directory { path: "/tmp".into(), max_snapshots: 0 };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_level_accepts_filter_directives() {
        let mut config = ServiceConfig::default();
        config.logging.level = "info,stream_processor=debug".to_string();
        assert!(validate_config(&config).is_ok());

        config.logging.level = "stream_processor=loudest".to_string();
        assert!(validate_config(&config).is_err());
    }
}
