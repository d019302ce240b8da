//! Per-unit-of-work state shared by the agent and every collector.
//!
//! One `ApmContext` is created per request/job/task and handed to collectors
//! at construction; it is the only way they learn which transaction is open.

use parking_lot::Mutex;
use std::sync::Arc;

use super::client::TransactionProvider;
use super::clock::{Clock, SystemClock};
use super::stack::TransactionStack;

#[derive(Debug)]
pub struct ApmContext {
    stack: Mutex<TransactionStack>,
    provider: Arc<dyn TransactionProvider>,
    clock: Arc<dyn Clock>,
    request_start_time: f64,
}

impl ApmContext {
    pub fn new(provider: Arc<dyn TransactionProvider>, request_start_time: f64) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock), request_start_time)
    }

    pub fn with_clock(
        provider: Arc<dyn TransactionProvider>,
        clock: Arc<dyn Clock>,
        request_start_time: f64,
    ) -> Self {
        Self {
            stack: Mutex::new(TransactionStack::new()),
            provider,
            clock,
            request_start_time,
        }
    }

    /// Innermost open transaction, or an empty string when none is open.
    pub fn latest_transaction_name(&self) -> String {
        self.stack.lock().latest().unwrap_or_default().to_string()
    }

    /// Time basis for offsets of measures attached to `transaction_name`.
    ///
    /// Empty names, and names the provider no longer knows, resolve to the
    /// request start time.
    pub fn origin_time(&self, transaction_name: &str) -> f64 {
        if transaction_name.is_empty() {
            return self.request_start_time;
        }

        match self.provider.get_transaction(transaction_name) {
            Some(transaction) => transaction.start_time(),
            None => {
                log::warn!(
                    "[APM] Transaction '{}' unknown to provider, measuring from request start",
                    transaction_name
                );
                self.request_start_time
            }
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn request_start_time(&self) -> f64 {
        self.request_start_time
    }

    pub fn provider(&self) -> &Arc<dyn TransactionProvider> {
        &self.provider
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `f` with exclusive access to the transaction stack.
    pub fn with_stack<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut TransactionStack) -> R,
    {
        f(&mut self.stack.lock())
    }

    pub fn open_transaction_count(&self) -> usize {
        self.stack.lock().len()
    }
}
