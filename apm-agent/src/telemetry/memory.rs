//! In-process agent client that keeps everything in memory.
//!
//! Serves as the transaction provider and event sink for tests, local
//! development and the demo binary. `send()` moves buffered data into
//! batches that can be inspected afterwards.

use apm_types::{Context, ErrorEvent, ExportRecord, SpanEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::client::{EventSink, TransactionProvider};
use super::clock::{Clock, SystemClock};
use super::transaction::{Transaction, TransactionHandle};
use crate::error::{ApmError, ApmResult};

#[derive(Debug)]
pub struct InMemoryAgent {
    clock: Arc<dyn Clock>,
    transactions: RwLock<HashMap<String, TransactionHandle>>,
    events: Mutex<Vec<SpanEvent>>,
    errors: Mutex<Vec<ErrorEvent>>,
    batches: Mutex<Vec<Vec<ExportRecord>>>,
    /// When set, `send()` fails without touching buffers
    fail_sends: AtomicBool,
}

impl InMemoryAgent {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            transactions: RwLock::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Snapshot of span events put since the last send.
    pub fn events(&self) -> Vec<SpanEvent> {
        self.events.lock().clone()
    }

    /// Span events put since the last send for one transaction.
    pub fn events_for(&self, transaction_name: &str) -> Vec<SpanEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.transaction_name == transaction_name)
            .cloned()
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorEvent> {
        self.errors.lock().clone()
    }

    /// Batches produced by successful `send()` calls, oldest first.
    pub fn sent_batches(&self) -> Vec<Vec<ExportRecord>> {
        self.batches.lock().clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }
}

impl Default for InMemoryAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionProvider for InMemoryAgent {
    fn start_transaction(
        &self,
        name: &str,
        context: Context,
        start_time: Option<f64>,
    ) -> ApmResult<TransactionHandle> {
        let mut transactions = self.transactions.write();
        if transactions.contains_key(name) {
            return Err(ApmError::DuplicateTransaction(name.to_string()));
        }

        let start = start_time.unwrap_or_else(|| self.clock.now());
        let handle = TransactionHandle::new(Transaction::new(name, context, start));
        transactions.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    fn stop_transaction(&self, name: &str, meta: Context) -> ApmResult<()> {
        let transaction = self
            .get_transaction(name)
            .ok_or_else(|| ApmError::TransactionNotFound(name.to_string()))?;
        transaction.finish(self.clock.now(), meta);
        Ok(())
    }

    fn get_transaction(&self, name: &str) -> Option<TransactionHandle> {
        self.transactions.read().get(name).cloned()
    }
}

impl EventSink for InMemoryAgent {
    fn put_event(&self, event: SpanEvent) {
        self.events.lock().push(event);
    }

    fn capture_error(&self, error: ErrorEvent) {
        self.errors.lock().push(error);
    }

    fn send(&self) -> ApmResult<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(ApmError::Export("in-memory agent configured to fail".to_string()));
        }

        let mut batch = Vec::new();

        // Finished transactions leave the registry once sent
        {
            let mut transactions = self.transactions.write();
            let finished: Vec<String> = transactions
                .iter()
                .filter(|(_, t)| t.is_finished())
                .map(|(name, _)| name.clone())
                .collect();
            for name in finished {
                if let Some(t) = transactions.remove(&name) {
                    batch.push(ExportRecord::Transaction(t.snapshot().to_record()));
                }
            }
        }

        batch.extend(std::mem::take(&mut *self.events.lock()).into_iter().map(ExportRecord::Span));
        batch.extend(std::mem::take(&mut *self.errors.lock()).into_iter().map(ExportRecord::Error));

        log::info!("[APM] Sent batch of {} records", batch.len());
        self.batches.lock().push(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::clock::ManualClock;

    #[test]
    fn test_start_uses_clock_unless_given() {
        let clock = Arc::new(ManualClock::new(7.0));
        let agent = InMemoryAgent::with_clock(clock);

        let a = agent.start_transaction("a", Context::new(), None).unwrap();
        let b = agent.start_transaction("b", Context::new(), Some(1.0)).unwrap();
        assert_eq!(a.start_time(), 7.0);
        assert_eq!(b.start_time(), 1.0);
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let agent = InMemoryAgent::new();
        agent.start_transaction("a", Context::new(), None).unwrap();

        assert!(matches!(
            agent.start_transaction("a", Context::new(), None),
            Err(ApmError::DuplicateTransaction(_))
        ));
        assert!(matches!(
            agent.stop_transaction("nope", Context::new()),
            Err(ApmError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_send_moves_finished_transactions_and_events() {
        let clock = Arc::new(ManualClock::new(0.0));
        let agent = InMemoryAgent::with_clock(clock.clone());
        agent.start_transaction("done", Context::new(), None).unwrap();
        agent.start_transaction("open", Context::new(), None).unwrap();
        clock.advance(1.0);
        agent.stop_transaction("done", Context::new()).unwrap();

        agent.capture_error(ErrorEvent {
            id: "e".to_string(),
            message: "boom".to_string(),
            context: Context::new(),
            transaction_id: None,
            transaction_name: None,
            timestamp: 1.0,
        });

        agent.send().unwrap();

        let batches = agent.sent_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(agent.get_transaction("done").is_none());
        assert!(agent.get_transaction("open").is_some());
        assert!(agent.errors().is_empty());
    }

    #[test]
    fn test_failing_send_keeps_buffers() {
        let agent = InMemoryAgent::new();
        agent.start_transaction("t", Context::new(), None).unwrap();
        agent.stop_transaction("t", Context::new()).unwrap();
        agent.set_fail_sends(true);

        assert!(matches!(agent.send(), Err(ApmError::Export(_))));
        assert!(agent.sent_batches().is_empty());
        assert_eq!(agent.transaction_count(), 1);
    }
}
