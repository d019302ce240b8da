//! Database query log collector.
//!
//! The host's database layer reports each executed statement after the fact
//! (statement + elapsed time); the span is placed so that it ends "now".

use apm_types::Context;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApmResult;
use crate::telemetry::context::ApmContext;
use crate::telemetry::measurement::Measurement;
use crate::telemetry::registry::Collector;

pub const QUERY_COLLECTOR_NAME: &str = "query-log";

static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:from|into|update|join)\s+[`"\[]?([\w.]+)"#).expect("valid table regex")
});

#[derive(Debug)]
pub struct QueryCollector {
    ctx: Arc<ApmContext>,
    measures: Mutex<Vec<Measurement>>,
}

impl QueryCollector {
    pub fn new(ctx: Arc<ApmContext>) -> Self {
        Self {
            ctx,
            measures: Mutex::new(Vec::new()),
        }
    }

    /// Record a statement that just finished after `duration_ms`.
    pub fn record_query(&self, sql: &str, duration_ms: f64, connection: &str) {
        let transaction = self.ctx.latest_transaction_name();
        let end = self.ctx.now() - self.ctx.origin_time(&transaction);
        let start = end - duration_ms / 1000.0;

        let mut context = Context::new();
        context.insert(
            "db".to_string(),
            json!({
                "statement": sql,
                "type": "sql",
                "instance": connection,
            }),
        );

        let label = query_label(sql);
        log::debug!("[QUERY] {} ({}ms) --- '{}'", label, duration_ms, transaction);

        self.measures.lock().push(Measurement::from_offsets(
            label,
            start,
            end,
            "db.query",
            Some("query".to_string()),
            context,
            transaction,
        ));
    }

    pub fn query_count(&self) -> usize {
        self.measures.lock().len()
    }
}

impl Collector for QueryCollector {
    fn name(&self) -> &str {
        QUERY_COLLECTOR_NAME
    }

    fn collect(&self, transaction_name: &str) -> ApmResult<Vec<Measurement>> {
        Ok(self
            .measures
            .lock()
            .iter()
            .filter(|m| m.transaction == transaction_name)
            .cloned()
            .collect())
    }

    fn reset(&self) {
        self.measures.lock().clear();
    }
}

/// Short span name for a statement: leading keyword plus the first table.
pub fn query_label(sql: &str) -> String {
    let keyword = match sql.split_whitespace().next() {
        Some(word) => word.to_uppercase(),
        None => return "query".to_string(),
    };

    match TABLE_RE.captures(sql).and_then(|c| c.get(1)) {
        Some(table) => format!("{} {}", keyword, table.as_str()),
        None => keyword,
    }
}
