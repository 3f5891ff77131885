//! Configuration for the StreamProcessor

use crate::error::ConfigError;
use crate::{DEFAULT_DEDUP_CAPACITY, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_POLL_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the StreamProcessor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of event ids remembered by the deduplication window
    pub dedup_capacity: usize,

    /// Interval between automatic flushes, in seconds
    pub flush_interval_secs: u64,

    /// Upper bound on a single broker poll, in milliseconds
    pub poll_timeout_ms: u64,

    /// Backoff applied after a failed poll
    pub poll_backoff: BackoffConfig,

    /// Upper bound on a single sink call, in milliseconds
    pub sink_timeout_ms: u64,

    /// Clear the aggregates after every successful flush
    pub reset_after_flush: bool,

    /// Perform one last flush when the processor is stopped
    pub flush_on_stop: bool,

    /// Memory bounds for the aggregation state
    pub limits: AggregationLimits,
}

/// Capped exponential backoff after poll errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: u32,
}

/// Key-count and key-length limits for every aggregate map
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationLimits {
    /// Distinct pages tracked in `page_views`
    pub max_pages: usize,

    /// Page paths are truncated to this many characters
    pub max_page_len: usize,

    /// Distinct products tracked in `product_interest`
    pub max_products: usize,

    /// Product ids are truncated to this many characters
    pub max_product_id_len: usize,

    /// Distinct interaction types tracked per product
    pub max_interaction_types: usize,

    /// Interaction types are truncated to this many characters
    pub max_interaction_type_len: usize,

    /// Hourly revenue buckets (one year of hours by default)
    pub max_revenue_buckets: usize,

    /// Distinct normalized queries tracked in `search_queries`
    pub max_queries: usize,

    /// Queries longer than this (after normalization) are dropped
    pub max_query_len: usize,

    /// Order amounts above this are treated as suspicious
    pub max_order_amount: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            poll_backoff: BackoffConfig::default(),
            sink_timeout_ms: 10_000,
            reset_after_flush: false,
            flush_on_stop: true,
            limits: AggregationLimits::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_ms: 100, max_ms: 5_000, multiplier: 2 }
    }
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            max_pages: 10_000,
            max_page_len: 200,
            max_products: 10_000,
            max_product_id_len: 50,
            max_interaction_types: 64,
            max_interaction_type_len: 50,
            max_revenue_buckets: 24 * 365,
            max_queries: 10_000,
            max_query_len: 500,
            max_order_amount: 1_000_000.0,
        }
    }
}

impl ProcessorConfig {
    /// Get flush interval as Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Get poll timeout as Duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Get sink timeout as Duration
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup_capacity == 0 {
            return Err(ConfigError::Zero { field: "dedup_capacity" });
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Zero { field: "flush_interval_secs" });
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Zero { field: "poll_timeout_ms" });
        }
        if self.sink_timeout_ms == 0 {
            return Err(ConfigError::Zero { field: "sink_timeout_ms" });
        }
        self.poll_backoff.validate()?;
        self.limits.validate()
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_ms == 0 {
            return Err(ConfigError::Zero { field: "poll_backoff.initial_ms" });
        }
        if self.multiplier == 0 {
            return Err(ConfigError::Zero { field: "poll_backoff.multiplier" });
        }
        if self.max_ms < self.initial_ms {
            return Err(ConfigError::invalid(
                "poll_backoff.max_ms",
                format!("{} is below initial_ms {}", self.max_ms, self.initial_ms),
            ));
        }
        Ok(())
    }
}

impl AggregationLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("limits.max_pages", self.max_pages),
            ("limits.max_page_len", self.max_page_len),
            ("limits.max_products", self.max_products),
            ("limits.max_product_id_len", self.max_product_id_len),
            ("limits.max_interaction_types", self.max_interaction_types),
            ("limits.max_interaction_type_len", self.max_interaction_type_len),
            ("limits.max_revenue_buckets", self.max_revenue_buckets),
            ("limits.max_queries", self.max_queries),
            ("limits.max_query_len", self.max_query_len),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        if !self.max_order_amount.is_finite() || self.max_order_amount <= 0.0 {
            return Err(ConfigError::invalid(
                "limits.max_order_amount",
                format!("{} is not a positive finite amount", self.max_order_amount),
            ));
        }

        Ok(())
    }
}
