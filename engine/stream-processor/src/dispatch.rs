// Event dispatch for the StreamProcessor

use crate::config::AggregationLimits;
use crate::envelope::{Envelope, EventKind};
use crate::error::HandlerError;
use crate::handlers::{handler_for, Handler};
use crate::metrics::ProcessorMetrics;
use crate::state::AggregationState;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Result of handing one envelope to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Processed,
    Skipped(SkipReason),
}

/// Why an envelope did not update the aggregates
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The event id is still in the deduplication window
    Duplicate,
    /// The message could not be decoded into an envelope
    Decode(String),
    /// No handler for this type tag (or no tag at all)
    NoHandler(String),
    /// The handler rejected the payload
    InvalidPayload(HandlerError),
    /// The handler panicked; the panic was contained
    HandlerPanicked(String),
}

impl Outcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, Outcome::Processed)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Duplicate => write!(f, "duplicate event id"),
            SkipReason::Decode(e) => write!(f, "decode failed: {e}"),
            SkipReason::NoHandler(tag) => write!(f, "no handler for type '{tag}'"),
            SkipReason::InvalidPayload(e) => write!(f, "invalid payload: {e}"),
            SkipReason::HandlerPanicked(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

/// Routes envelopes to the handler registered for their kind
pub struct EventDispatcher {
    limits: AggregationLimits,
    metrics: Arc<ProcessorMetrics>,
}

impl EventDispatcher {
    pub fn new(limits: AggregationLimits, metrics: Arc<ProcessorMetrics>) -> Self {
        Self { limits, metrics }
    }

    /// Apply an envelope to the state through its handler
    ///
    /// Never panics and never propagates handler failures; every failure
    /// comes back as `Outcome::Skipped`.
    pub fn dispatch(&self, state: &mut AggregationState, envelope: &Envelope) -> Outcome {
        match envelope.kind() {
            Some(kind) => self.run_handler(kind, handler_for(kind), state, envelope),
            None => {
                tracing::debug!(
                    "Skipping event {:?}: no handler for type '{}'",
                    envelope.event_id,
                    envelope.tag_or_missing()
                );
                Outcome::Skipped(SkipReason::NoHandler(envelope.tag_or_missing().to_string()))
            }
        }
    }

    pub(crate) fn run_handler(
        &self,
        kind: EventKind,
        handler: Handler,
        state: &mut AggregationState,
        envelope: &Envelope,
    ) -> Outcome {
        let limits = &self.limits;
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| handler(state, &envelope.payload, limits)));

        match result {
            Ok(Ok(upsert)) => {
                if upsert.is_rejected() {
                    self.metrics.keys_rejected.inc();
                    tracing::debug!(
                        "{} event {:?} dropped a new key: aggregate map at capacity",
                        kind,
                        envelope.event_id
                    );
                }
                Outcome::Processed
            }
            Ok(Err(e)) => {
                tracing::warn!("Dropping {} event {:?}: {}", kind, envelope.event_id, e);
                Outcome::Skipped(SkipReason::InvalidPayload(e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    "Handler for {} panicked on event {:?}: {} (payload: {:?})",
                    kind,
                    envelope.event_id,
                    message,
                    envelope.payload
                );
                Outcome::Skipped(SkipReason::HandlerPanicked(message))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
