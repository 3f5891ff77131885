//! # StreamProcessor
//!
//! Real-time event aggregation for storefront analytics.
//!
//! The StreamProcessor consumes a continuous stream of domain events (page views,
//! product interactions, completed orders, search queries) from a message broker
//! and maintains bounded, in-memory aggregates for dashboards. Delivery is
//! at-least-once; processing is made idempotent through a FIFO deduplication
//! window keyed on the event identifier.
//!
//! ## Architecture
//!
//! - **Envelope**: wire decoding of a single broker message
//! - **Deduplicator**: bounded, insertion-ordered record of seen event ids
//! - **EventDispatcher**: routes an envelope to exactly one aggregation handler
//! - **AggregationState**: bounded counter maps plus processed/skipped counters
//! - **FlushScheduler**: interval trigger that exports snapshots to a sink
//! - **StreamProcessor**: the single-writer consumer loop and its lifecycle

pub mod backoff;
pub mod broker;
pub mod config;
pub mod counters;
pub mod dedup;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod flush;
pub mod handlers;
pub mod metrics;
pub mod processor;
pub mod sink;
pub mod state;


pub use broker::{
    BrokerClient, BrokerConnector, BrokerMessage, ChannelBroker, ChannelConnector, ChannelSender,
    LineBroker, LineConnector, LineSource, spawn_line_reader,
};
pub use config::{AggregationLimits, BackoffConfig, ProcessorConfig};
pub use counters::{BoundedCounterMap, Upsert};
pub use dedup::Deduplicator;
pub use dispatch::{EventDispatcher, Outcome, SkipReason};
pub use envelope::{Envelope, EventKind};
pub use error::{BrokerError, ConfigError, DecodeError, HandlerError, ProcessorError, SinkError};
pub use flush::FlushScheduler;
pub use metrics::{MetricsSnapshot, ProcessorMetrics};
pub use processor::{EventAggregator, LoopExit, ProcessorState, StreamProcessor};
pub use sink::{FlushRecord, InMemorySink, LocalFileSink, LogSink, SnapshotSink};
pub use state::{AggregationState, PageRanking, ProductRanking, StatsSnapshot};

/// Current version of the StreamProcessor
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default size of the deduplication window
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Default flush interval in seconds
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;

/// Default broker poll timeout in milliseconds
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;
