//! Core StreamProcessor implementation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backoff::Backoff;
use crate::broker::{BrokerClient, BrokerConnector, BrokerMessage};
use crate::config::ProcessorConfig;
use crate::dedup::Deduplicator;
use crate::dispatch::{EventDispatcher, Outcome, SkipReason};
use crate::envelope::Envelope;
use crate::error::{ProcessorError, SinkError};
use crate::flush::FlushScheduler;
use crate::metrics::{MetricsSnapshot, ProcessorMetrics};
use crate::sink::SnapshotSink;
use crate::state::{AggregationState, PageRanking, ProductRanking, StatsSnapshot};

/// Lifecycle state of a [`StreamProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Running,
}

/// How the consumer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The loop ran and exited after `stop()`
    Stopped,
    /// The broker client could not be constructed; the loop never ran
    Degraded,
}

/// Decode, deduplicate and dispatch raw messages into the aggregation state
///
/// This is the synchronous core of the consumer loop. It has no locking of
/// its own: whoever owns it is the single writer.
pub struct EventAggregator {
    state: AggregationState,
    dedup: Deduplicator,
    dispatcher: EventDispatcher,
    metrics: Arc<ProcessorMetrics>,
}

impl EventAggregator {
    pub fn new(config: &ProcessorConfig, metrics: Arc<ProcessorMetrics>) -> Self {
        Self {
            state: AggregationState::new(&config.limits),
            dedup: Deduplicator::new(config.dedup_capacity),
            dispatcher: EventDispatcher::new(config.limits.clone(), metrics.clone()),
            metrics,
        }
    }

    /// Apply one raw broker message and count it as processed or skipped
    pub fn process_message(&mut self, bytes: &[u8]) -> Outcome {
        let outcome = self.apply(bytes);

        match &outcome {
            Outcome::Processed => self.state.record_processed(),
            Outcome::Skipped(reason) => {
                self.state.record_skipped();
                self.metrics.record_skip(reason);
            }
        }

        outcome
    }

    fn apply(&mut self, bytes: &[u8]) -> Outcome {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Skipping undecodable message ({} bytes): {}", bytes.len(), e);
                return Outcome::Skipped(SkipReason::Decode(e.to_string()));
            }
        };

        // Events without an id cannot be deduplicated and are always dispatched
        if let Some(id) = envelope.event_id.as_deref() {
            if self.dedup.check_and_record(id) {
                tracing::debug!("Skipping duplicate event {}", id);
                return Outcome::Skipped(SkipReason::Duplicate);
            }
        }

        self.dispatcher.dispatch(&mut self.state, &envelope)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.snapshot()
    }

    pub fn top_products(&self, n: usize) -> Vec<ProductRanking> {
        self.state.top_products(n)
    }

    pub fn top_pages(&self, n: usize) -> Vec<PageRanking> {
        self.state.top_pages(n)
    }

    /// Clear all counters; the deduplication window is kept
    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    pub fn dedup_window_len(&self) -> usize {
        self.dedup.len()
    }
}

/// The StreamProcessor - owns the consumer loop and the aggregation state
pub struct StreamProcessor {
    // Core state
    aggregator: RwLock<EventAggregator>,
    is_running: AtomicBool,
    // Bumped by every start() and stop(); a loop exits once it no longer owns the current one
    generation: AtomicU64,

    // External collaborators
    connector: Arc<dyn BrokerConnector>,
    broker: tokio::sync::Mutex<Option<Box<dyn BrokerClient>>>,
    sink: Arc<dyn SnapshotSink>,

    // Flushing
    scheduler: Mutex<FlushScheduler>,

    // Configuration
    config: ProcessorConfig,

    // Metrics
    metrics: Arc<ProcessorMetrics>,
}

impl StreamProcessor {
    /// Create a new StreamProcessor; nothing is connected until `start()`
    pub fn new(
        config: ProcessorConfig,
        connector: Arc<dyn BrokerConnector>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self, ProcessorError> {
        config.validate()?;

        let metrics = Arc::new(ProcessorMetrics::new());
        tracing::info!(
            "Creating StreamProcessor (dedup window {}, flush every {}s, sink {})",
            config.dedup_capacity,
            config.flush_interval_secs,
            sink.name()
        );

        Ok(Self {
            aggregator: RwLock::new(EventAggregator::new(&config, metrics.clone())),
            is_running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            connector,
            broker: tokio::sync::Mutex::new(None),
            sink,
            scheduler: Mutex::new(FlushScheduler::new(config.flush_interval())),
            config,
            metrics,
        })
    }

    /// Run the consumer loop until `stop()` is called
    ///
    /// Returns `LoopExit::Degraded` without looping when the broker client
    /// cannot be constructed. Only one loop may run at a time.
    pub async fn start(&self) -> Result<LoopExit, ProcessorError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(ProcessorError::AlreadyRunning);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut client = match self.connector.connect().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    "StreamProcessor degraded: cannot connect to {}: {}",
                    self.connector.describe(),
                    e
                );
                if self.owns(generation) {
                    self.is_running.store(false, Ordering::SeqCst);
                }
                return Ok(LoopExit::Degraded);
            }
        };

        {
            let mut broker = self.broker.lock().await;
            if !self.owns(generation) {
                // stop() won the race with connect
                drop(broker);
                if let Err(e) = client.close().await {
                    tracing::warn!("Failed to close broker client: {}", e);
                }
                tracing::info!("StreamProcessor stopped before consuming");
                return Ok(LoopExit::Stopped);
            }
            *broker = Some(client);
        }
        self.scheduler.lock().mark_flushed();

        tracing::info!("StreamProcessor consuming from {}", self.connector.describe());

        let poll_timeout = self.config.poll_timeout();
        let mut backoff = Backoff::new(&self.config.poll_backoff);

        while self.is_running.load(Ordering::SeqCst) && self.owns(generation) {
            tokio::task::yield_now().await;

            let polled = {
                let mut broker = self.broker.lock().await;
                // A stop() and start() may have swapped in another loop's client
                if !self.owns(generation) {
                    break;
                }
                match broker.as_mut() {
                    Some(client) => client.poll(poll_timeout).await,
                    // Closed by stop()
                    None => break,
                }
            };

            match polled {
                Ok(Some(message)) => {
                    backoff.reset();
                    self.metrics.messages_polled.inc();
                    self.handle_message(&message);
                }
                Ok(None) => backoff.reset(),
                Err(e) => {
                    self.metrics.poll_errors.inc();
                    let delay = backoff.next().unwrap_or(poll_timeout);
                    tracing::warn!("Broker poll failed: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }

            let flush_due = self.scheduler.lock().is_due();
            if flush_due {
                self.interval_flush().await;
            }
        }

        tracing::info!("StreamProcessor loop stopped");
        Ok(LoopExit::Stopped)
    }

    /// Stop the consumer loop and close the broker client
    ///
    /// Safe to call at any time, including before `start()` or after a
    /// degraded start. A final flush runs only if the loop was running.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_running = self.is_running.swap(false, Ordering::SeqCst);

        let client = self.broker.lock().await.take();
        if let Some(mut client) = client {
            if let Err(e) = client.close().await {
                tracing::warn!("Failed to close broker client: {}", e);
            }
        }

        if was_running && self.config.flush_on_stop {
            if let Err(e) = self.flush_now().await {
                tracing::error!("Final flush failed: {}", e);
            }
        }

        tracing::info!("StreamProcessor stopped");
    }

    /// Hand a snapshot of the current state to the sink right away
    pub async fn flush_now(&self) -> Result<(), ProcessorError> {
        self.flush().await.map(|_| ()).map_err(ProcessorError::from)
    }

    fn owns(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn handle_message(&self, message: &BrokerMessage) {
        let outcome = self.aggregator.write().process_message(&message.payload);
        if let Outcome::Skipped(reason) = &outcome {
            tracing::trace!("Message at offset {} skipped: {}", message.offset, reason);
        }
    }

    async fn interval_flush(&self) {
        // Failures are already logged; the next interval is attempted independently
        if let Ok(snapshot) = self.flush().await {
            if self.config.reset_after_flush {
                self.aggregator.write().reset();
                tracing::debug!(
                    "Started new aggregation epoch after flushing {} events",
                    snapshot.events_processed
                );
            }
        }
    }

    async fn flush(&self) -> Result<StatsSnapshot, SinkError> {
        let snapshot = self.aggregator.read().snapshot();
        self.scheduler.lock().mark_flushed();

        let sink_timeout = self.config.sink_timeout();
        let result =
            match tokio::time::timeout(sink_timeout, self.sink.write_snapshot(&snapshot)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(SinkError::Timeout(self.config.sink_timeout_ms)),
            };

        match result {
            Ok(()) => {
                self.metrics.flushes.inc();
                tracing::debug!(
                    "Flushed snapshot to {} sink ({} processed, {} skipped)",
                    self.sink.name(),
                    snapshot.events_processed,
                    snapshot.events_skipped
                );
                Ok(snapshot)
            }
            Err(e) => {
                self.metrics.flush_failures.inc();
                tracing::error!("Flush to {} sink failed: {}", self.sink.name(), e);
                Err(e)
            }
        }
    }

    // Read API: point-in-time copies only

    pub fn get_stats(&self) -> StatsSnapshot {
        self.aggregator.read().snapshot()
    }

    pub fn get_top_products(&self, n: usize) -> Vec<ProductRanking> {
        self.aggregator.read().top_products(n)
    }

    pub fn get_top_pages(&self, n: usize) -> Vec<PageRanking> {
        self.aggregator.read().top_pages(n)
    }

    /// Clear all counters to a fresh, empty state
    pub fn reset_stats(&self) {
        self.aggregator.write().reset();
        tracing::info!("Aggregation statistics reset");
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn state(&self) -> ProcessorState {
        if self.is_running.load(Ordering::SeqCst) {
            ProcessorState::Running
        } else {
            ProcessorState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessorState::Running
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }
}
