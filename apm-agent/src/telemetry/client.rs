//! Seams to the remote agent client.
//!
//! The collection core only needs to open, close and look up transactions and
//! to hand finished events to an exporter. How those reach a backend is the
//! client's business.

use apm_types::{Context, ErrorEvent, SpanEvent};
use std::fmt::Debug;

use super::transaction::TransactionHandle;
use crate::error::ApmResult;

/// Creates and tracks transactions by name.
pub trait TransactionProvider: Send + Sync + Debug {
    /// Open a transaction. `start_time` defaults to the provider's "now".
    fn start_transaction(
        &self,
        name: &str,
        context: Context,
        start_time: Option<f64>,
    ) -> ApmResult<TransactionHandle>;

    /// Close a transaction, recording its end time and attaching `meta`.
    fn stop_transaction(&self, name: &str, meta: Context) -> ApmResult<()>;

    /// Look up a transaction (open or closed but not yet sent) by name.
    fn get_transaction(&self, name: &str) -> Option<TransactionHandle>;
}

/// Receives finished events for export.
///
/// Implementations must not block the caller and must not surface delivery
/// failures through `put_event`.
pub trait EventSink: Send + Sync + Debug {
    fn put_event(&self, event: SpanEvent);

    fn capture_error(&self, error: ErrorEvent) {
        log::warn!("[APM] Dropping captured error, sink has no error channel: {}", error.message);
    }

    /// Flush whatever has been buffered.
    fn send(&self) -> ApmResult<()> {
        Ok(())
    }
}
