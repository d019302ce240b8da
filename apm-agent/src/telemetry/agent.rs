//! The collection orchestrator.
//!
//! `ApmAgent` opens and closes transactions, keeps the nesting stack in sync,
//! and at every transaction stop drains each registered collector into span
//! events for the sink. When the outermost transaction closes it also drains
//! measurements that were recorded while no transaction was open.

use apm_types::Context;
use std::sync::Arc;

use super::client::EventSink;
use super::context::ApmContext;
use super::event::{error_event, span_from_measurement};
use super::registry::{Collector, CollectorRegistry};
use super::timeline::TimelineCollector;
use super::transaction::TransactionHandle;
use crate::collectors::query::QueryCollector;
use crate::config::ApmConfig;
use crate::error::{ApmError, ApmResult};

/// Collectors created by [`ApmAgent::register_default_collectors`].
#[derive(Debug, Clone)]
pub struct DefaultCollectors {
    pub timeline: Arc<TimelineCollector>,
    /// Present when `spans.querylog.enabled` is on
    pub query_log: Option<Arc<QueryCollector>>,
}

#[derive(Debug)]
pub struct ApmAgent {
    ctx: Arc<ApmContext>,
    collectors: CollectorRegistry,
    sink: Arc<dyn EventSink>,
    max_trace_items: usize,
    strict_order: bool,
}

impl ApmAgent {
    pub fn new(config: &ApmConfig, ctx: Arc<ApmContext>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            ctx,
            collectors: CollectorRegistry::new(),
            sink,
            max_trace_items: config.spans.max_trace_items,
            strict_order: config.spans.strict_transaction_order,
        }
    }

    /// Register the built-in collectors and return handles to them.
    pub fn register_default_collectors(&self, config: &ApmConfig) -> DefaultCollectors {
        let query_log = if config.spans.querylog.enabled {
            let collector = Arc::new(QueryCollector::new(self.ctx.clone()));
            self.register_collector(collector.clone());
            Some(collector)
        } else {
            None
        };

        let timeline = Arc::new(TimelineCollector::new(self.ctx.clone()));
        self.register_collector(timeline.clone());

        DefaultCollectors { timeline, query_log }
    }

    pub fn register_collector(&self, collector: Arc<dyn Collector>) {
        self.collectors.register(collector);
    }

    pub fn collector(&self, name: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(name)
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.collectors
    }

    pub fn context(&self) -> &Arc<ApmContext> {
        &self.ctx
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn max_trace_items(&self) -> usize {
        self.max_trace_items
    }

    /// Innermost open transaction, or an empty string when none is open.
    pub fn latest_transaction_name(&self) -> String {
        self.ctx.latest_transaction_name()
    }

    /// Open a transaction.
    ///
    /// A nested transaction starts now and is linked to the innermost open
    /// one. Only an outermost transaction honours `explicit_start`, so its
    /// duration covers the whole request.
    pub fn start_transaction(
        &self,
        name: &str,
        context: Context,
        explicit_start: Option<f64>,
    ) -> ApmResult<TransactionHandle> {
        let parent = self.ctx.latest_transaction_name();
        let provider = self.ctx.provider();

        let transaction = if !parent.is_empty() {
            log::info!("[APM] Has parent, starting with current time: {}", name);
            let transaction = provider.start_transaction(name, context, Some(self.ctx.now()))?;
            match provider.get_transaction(&parent) {
                Some(parent_transaction) => transaction.set_parent(&parent_transaction),
                None => log::warn!(
                    "[APM] Parent transaction '{}' of '{}' not found, leaving unlinked",
                    parent,
                    name
                ),
            }
            transaction
        } else {
            log::info!("[APM] No parent, starting with request time: {}", name);
            let start = explicit_start.unwrap_or_else(|| self.ctx.now());
            provider.start_transaction(name, context, Some(start))?
        };

        self.ctx.with_stack(|stack| stack.push(name));
        log::info!("[APM] Started {}", name);

        Ok(transaction)
    }

    /// Close a transaction and export everything collected for it.
    ///
    /// The innermost open transaction is popped regardless of `name` unless
    /// strict ordering is configured, in which case a mismatch is an error and
    /// nothing changes.
    pub fn stop_transaction(&self, name: &str, meta: Context) -> ApmResult<()> {
        log::info!("[APM] Stopping {}", name);

        let remaining = self.ctx.with_stack(|stack| {
            let latest = stack.latest().unwrap_or_default();
            if latest != name {
                if self.strict_order {
                    return Err(ApmError::TransactionOrder {
                        expected: name.to_string(),
                        found: latest.to_string(),
                    });
                }
                log::warn!(
                    "[APM] Stopping '{}' but innermost open transaction is '{}'",
                    name,
                    latest
                );
            }
            stack.pop();
            Ok(stack.len())
        })?;

        let stopped = self.ctx.provider().stop_transaction(name, meta);
        if let Err(e) = &stopped {
            log::error!("[APM] Failed to finalize transaction {}: {}", name, e);
        }

        self.collect_events(name, None);

        // Nothing left open: also export measures never attached to a transaction
        if remaining == 0 {
            log::info!("[APM] Collecting empties");
            self.collect_events(name, Some(""));
        } else {
            log::info!("[APM] Still open: {}", remaining);
        }

        stopped
    }

    /// Drain every collector for `collect_by` (defaults to `transaction_name`)
    /// and put the resulting span events, attached to `transaction_name`.
    ///
    /// Each collector contributes at most `max_trace_items` events. A failing
    /// collector is logged and skipped. Returns the number of events put.
    pub fn collect_events(&self, transaction_name: &str, collect_by: Option<&str>) -> usize {
        log::info!(
            "[APM] Collecting for {}, {}",
            transaction_name,
            if collect_by.is_none() { transaction_name } else { "empty" }
        );

        let Some(transaction) = self.ctx.provider().get_transaction(transaction_name) else {
            log::warn!(
                "[APM] Transaction '{}' not found, nothing to attach spans to",
                transaction_name
            );
            return 0;
        };
        let key = collect_by.unwrap_or(transaction_name);

        let mut emitted = 0;
        for collector in self.collectors.list() {
            log::debug!("[APM] Collecting from {}", collector.name());

            let measures = match collector.collect(key) {
                Ok(measures) => measures,
                Err(e) => {
                    log::error!("[APM] Collector {} failed: {}", collector.name(), e);
                    continue;
                }
            };

            for measure in measures.iter().take(self.max_trace_items) {
                let event = span_from_measurement(measure, &transaction);
                log::debug!(
                    "[APM] Collected {} at {} and took {}",
                    measure.label,
                    measure.start,
                    measure.duration
                );
                self.sink.put_event(event);
                emitted += 1;
            }
        }

        emitted
    }

    /// Flush the sink. Failures are logged and returned; collector buffers
    /// are unaffected either way.
    pub fn send(&self) -> ApmResult<()> {
        self.sink.send().inspect_err(|e| {
            log::error!("[APM] Failed to send: {}", e);
        })
    }

    /// Report an application error, tied to `parent` when given.
    pub fn capture_error(
        &self,
        error: &dyn std::error::Error,
        context: Context,
        parent: Option<&TransactionHandle>,
    ) {
        let event = error_event(error.to_string(), context, parent, self.ctx.now());
        self.sink.capture_error(event);
    }

    /// Forget open transactions and every buffered measurement, so the agent
    /// can serve the next unit of work.
    pub fn reset(&self) {
        self.ctx.with_stack(|stack| stack.clear());
        self.collectors.reset_all();
        log::debug!("[APM] Reset agent state");
    }
}
