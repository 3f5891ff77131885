// Processing metrics for the StreamProcessor

use crate::dispatch::SkipReason;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters describing what the consumer loop has been doing
///
/// These are an operator aid alongside `events_processed`/`events_skipped` in
/// the stats snapshot; they are never reset by `reset_stats`.
#[derive(Debug)]
pub struct ProcessorMetrics {
    // Ingestion
    pub messages_polled: AtomicCounter,
    pub poll_errors: AtomicCounter,

    // Skip reasons
    pub duplicates: AtomicCounter,
    pub decode_failures: AtomicCounter,
    pub unknown_types: AtomicCounter,
    pub invalid_payloads: AtomicCounter,
    pub handler_panics: AtomicCounter,

    // Capacity guard hits
    pub keys_rejected: AtomicCounter,

    // Flushing
    pub flushes: AtomicCounter,
    pub flush_failures: AtomicCounter,

    pub started_at: Instant,
}

/// Serialisable copy of [`ProcessorMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_polled: u64,
    pub poll_errors: u64,
    pub duplicates: u64,
    pub decode_failures: u64,
    pub unknown_types: u64,
    pub invalid_payloads: u64,
    pub handler_panics: u64,
    pub keys_rejected: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub uptime_secs: u64,
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self {
            messages_polled: AtomicCounter::new(),
            poll_errors: AtomicCounter::new(),
            duplicates: AtomicCounter::new(),
            decode_failures: AtomicCounter::new(),
            unknown_types: AtomicCounter::new(),
            invalid_payloads: AtomicCounter::new(),
            handler_panics: AtomicCounter::new(),
            keys_rejected: AtomicCounter::new(),
            flushes: AtomicCounter::new(),
            flush_failures: AtomicCounter::new(),
            started_at: Instant::now(),
        }
    }

    /// Bump the counter matching a skip reason
    pub fn record_skip(&self, reason: &SkipReason) {
        match reason {
            SkipReason::Duplicate => self.duplicates.inc(),
            SkipReason::Decode(_) => self.decode_failures.inc(),
            SkipReason::NoHandler(_) => self.unknown_types.inc(),
            SkipReason::InvalidPayload(_) => self.invalid_payloads.inc(),
            SkipReason::HandlerPanicked(_) => self.handler_panics.inc(),
        }
    }

    /// Total skips across all reasons
    pub fn total_skipped(&self) -> u64 {
        self.duplicates.get()
            + self.decode_failures.get()
            + self.unknown_types.get()
            + self.invalid_payloads.get()
            + self.handler_panics.get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_polled: self.messages_polled.get(),
            poll_errors: self.poll_errors.get(),
            duplicates: self.duplicates.get(),
            decode_failures: self.decode_failures.get(),
            unknown_types: self.unknown_types.get(),
            invalid_payloads: self.invalid_payloads.get(),
            handler_panics: self.handler_panics.get(),
            keys_rejected: self.keys_rejected.get(),
            flushes: self.flushes.get(),
            flush_failures: self.flush_failures.get(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe atomic counter
#[derive(Debug)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}
