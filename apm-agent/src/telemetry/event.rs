//! Conversion of collected measurements into exportable events.

use apm_types::{Context, ErrorEvent, SpanEvent};

use super::measurement::Measurement;
use super::transaction::TransactionHandle;

/// Build the span event for `measure`, attached to `transaction`.
pub fn span_from_measurement(measure: &Measurement, transaction: &TransactionHandle) -> SpanEvent {
    let transaction_id = transaction.id();
    SpanEvent {
        id: uuid::Uuid::new_v4().to_string(),
        parent_id: transaction_id.clone(),
        transaction_id,
        transaction_name: transaction.name(),
        name: measure.label.clone(),
        span_type: measure.span_type.clone(),
        action: measure.action.clone(),
        context: measure.context.clone(),
        start: measure.start,
        duration: measure.duration,
    }
}

/// Build an error event, optionally tied to the transaction it happened in.
pub fn error_event(
    message: impl Into<String>,
    context: Context,
    parent: Option<&TransactionHandle>,
    timestamp: f64,
) -> ErrorEvent {
    ErrorEvent {
        id: uuid::Uuid::new_v4().to_string(),
        message: message.into(),
        context,
        transaction_id: parent.map(TransactionHandle::id),
        transaction_name: parent.map(TransactionHandle::name),
        timestamp,
    }
}
