//! Aggregation handlers, one per [`EventKind`]
//!
//! Every handler validates and normalises its inputs first and then performs
//! exactly one upsert against the state. A handler that returns an error has
//! not touched the state.

use crate::config::AggregationLimits;
use crate::counters::Upsert;
use crate::envelope::EventKind;
use crate::error::HandlerError;
use crate::state::AggregationState;
use serde_json::{Map, Value};

/// Signature shared by all aggregation handlers
pub type Handler =
    fn(&mut AggregationState, &Map<String, Value>, &AggregationLimits) -> Result<Upsert, HandlerError>;

/// Bucket used when an order carries no usable timestamp
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Length of an ISO-8601 hour prefix (`YYYY-MM-DDTHH`)
const HOUR_BUCKET_LEN: usize = 13;

/// The handler registered for a kind
pub fn handler_for(kind: EventKind) -> Handler {
    match kind {
        EventKind::PageView => page_view,
        EventKind::ProductInteraction => product_interaction,
        EventKind::OrderCompleted => order_completed,
        EventKind::SearchQuery => search_query,
    }
}

/// Count a view of `payload.page`
pub fn page_view(
    state: &mut AggregationState,
    payload: &Map<String, Value>,
    limits: &AggregationLimits,
) -> Result<Upsert, HandlerError> {
    let page = text_field(payload, "page", "unknown", limits.max_page_len);
    Ok(state.page_views.increment(&page, 1))
}

/// Count one `interaction_type` against `product_id`
pub fn product_interaction(
    state: &mut AggregationState,
    payload: &Map<String, Value>,
    limits: &AggregationLimits,
) -> Result<Upsert, HandlerError> {
    let product_id = text_field(payload, "product_id", "unknown", limits.max_product_id_len);
    let interaction =
        text_field(payload, "interaction_type", "view", limits.max_interaction_type_len);

    let inner_full = state.product_interest.get(&product_id).is_some_and(|counts| {
        !counts.contains_key(&interaction) && counts.len() >= limits.max_interaction_types
    });
    if inner_full {
        return Ok(Upsert::Rejected);
    }

    Ok(state.product_interest.upsert(&product_id, |counts| {
        let count = counts.entry(interaction).or_insert(0);
        *count = count.saturating_add(1);
    }))
}

/// Credit `payload.amount` to the hour bucket of `payload.timestamp`
pub fn order_completed(
    state: &mut AggregationState,
    payload: &Map<String, Value>,
    limits: &AggregationLimits,
) -> Result<Upsert, HandlerError> {
    let amount = parse_amount(payload.get("amount"))?;
    if !(0.0..=limits.max_order_amount).contains(&amount) {
        return Err(HandlerError::AmountOutOfRange(amount));
    }

    let bucket = hour_bucket(payload.get("timestamp"));
    Ok(state.revenue_by_hour.upsert(&bucket, |total| *total += amount))
}

/// Count a normalised search query
pub fn search_query(
    state: &mut AggregationState,
    payload: &Map<String, Value>,
    limits: &AggregationLimits,
) -> Result<Upsert, HandlerError> {
    let raw = match payload.get("query") {
        Some(Value::String(s)) => s,
        _ => return Err(HandlerError::MissingQuery),
    };

    let normalized = normalize_query(raw);
    let len = normalized.chars().count();
    if len == 0 {
        return Err(HandlerError::EmptyQuery);
    }
    if len > limits.max_query_len {
        return Err(HandlerError::QueryTooLong { len, max: limits.max_query_len });
    }

    Ok(state.search_queries.increment(&normalized, 1))
}

/// Lower-case and trim a query
pub fn normalize_query(raw: &str) -> String {
    raw.to_lowercase().trim().to_string()
}

/// `YYYY-MM-DDTHH` prefix of an ISO-8601 timestamp, or [`UNKNOWN_BUCKET`]
pub fn hour_bucket(timestamp: Option<&Value>) -> String {
    match timestamp {
        Some(Value::String(ts)) if ts.chars().count() >= HOUR_BUCKET_LEN => {
            ts.chars().take(HOUR_BUCKET_LEN).collect()
        }
        _ => UNKNOWN_BUCKET.to_string(),
    }
}

fn parse_amount(value: Option<&Value>) -> Result<f64, HandlerError> {
    let amount = match value {
        None | Some(Value::Null) => return Err(HandlerError::MissingAmount),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match amount {
        Some(amount) if amount.is_finite() => Ok(amount),
        _ => Err(HandlerError::InvalidAmount(value.map(Value::to_string).unwrap_or_default())),
    }
}

/// Read a scalar field as text, truncated to `max_chars`
fn text_field(payload: &Map<String, Value>, key: &str, default: &str, max_chars: usize) -> String {
    let text = match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => return default.to_string(),
    };
    truncate_chars(&text, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
