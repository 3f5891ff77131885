//! # Command Line Interface

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{InputConfig, Overrides};

/// Real-time storefront event aggregation
#[derive(Parser, Debug)]
#[command(name = "stream-analytics")]
#[command(version, about = "Aggregate storefront events from a JSON-lines stream")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON-lines event source; `-` reads stdin
    #[arg(short, long)]
    pub input: Option<String>,

    /// Write flushed snapshots into this directory instead of the log
    #[arg(long)]
    pub sink_dir: Option<PathBuf>,

    /// Log level or filter directives, e.g. `info,stream_processor=debug`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            input: self.input.as_deref().map(InputConfig::from_arg),
            sink_dir: self.sink_dir.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.map(|format| format.as_str().to_string()),
        }
    }
}
