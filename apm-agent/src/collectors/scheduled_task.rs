//! Records each scheduled task run as its own transaction.

use apm_types::Context;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;

use super::TaskListener;
use crate::config::ApmConfig;
use crate::error::ApmResult;
use crate::telemetry::agent::ApmAgent;

/// Result code attached to every finished or skipped task.
const TASK_RESULT: u16 = 200;

pub struct ScheduledTaskCollector {
    agent: Arc<ApmAgent>,
    ignore_patterns: Vec<Regex>,
}

impl ScheduledTaskCollector {
    pub fn new(agent: Arc<ApmAgent>, config: &ApmConfig) -> ApmResult<Self> {
        let ignore_patterns = config
            .transactions
            .ignore_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            agent,
            ignore_patterns,
        })
    }

    pub fn name(&self) -> &str {
        "scheduled-task-collector"
    }

    /// Transaction name for a task command, or `None` when it should not be recorded.
    pub fn transaction_name(&self, command: &str) -> Option<String> {
        if command.is_empty() || self.should_ignore(command) {
            return None;
        }
        Some(command.to_string())
    }

    fn should_ignore(&self, name: &str) -> bool {
        self.ignore_patterns.iter().any(|re| re.is_match(name))
    }

    fn is_open(&self, name: &str) -> bool {
        self.agent.context().provider().get_transaction(name).is_some()
    }

    fn stop(&self, name: &str) {
        let mut meta = Context::new();
        meta.insert("result".to_string(), json!(TASK_RESULT));
        if let Err(e) = self.agent.stop_transaction(name, meta) {
            log::error!("[SCHEDULER] Failed to stop transaction {}: {}", name, e);
        }
    }
}

impl TaskListener for ScheduledTaskCollector {
    fn on_start(&self, command: &str) {
        let Some(name) = self.transaction_name(command) else {
            return;
        };

        // A transaction by this name already exists; starting another would fail
        if self.is_open(&name) {
            log::debug!("[SCHEDULER] Transaction {} already exists, ignoring run", name);
            return;
        }

        let transaction = match self.agent.start_transaction(&name, Context::new(), None) {
            Ok(t) => t,
            Err(e) => {
                log::error!("[SCHEDULER] Failed to start transaction {}: {}", name, e);
                return;
            }
        };

        let mut meta = Context::new();
        meta.insert("type".to_string(), json!("scheduled-task"));
        transaction.set_meta(meta);

        let mut custom = Context::new();
        custom.insert(
            "ran_at".to_string(),
            json!(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        if let Some(memory) = peak_memory() {
            custom.insert("memory".to_string(), memory);
        }
        transaction.set_custom_context(custom);
    }

    fn on_skip(&self, command: &str) {
        if let Some(name) = self.transaction_name(command) {
            if self.is_open(&name) {
                self.stop(&name);
            }
        }
    }

    fn on_stop(&self, command: &str) {
        if let Some(name) = self.transaction_name(command) {
            if self.is_open(&name) {
                self.stop(&name);
                // Already logged by the agent; a failed send must not fail the task
                let _ = self.agent.send();
            }
        }
    }
}

/// Peak memory of this process as `{peak, peak_real}` in megabytes, e.g. `"12.5M"`.
///
/// `peak` is the resident high-water mark, `peak_real` the peak virtual size.
/// Only available where `/proc/self/status` exists.
fn peak_memory() -> Option<serde_json::Value> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let peak = status_kib(&status, "VmHWM:")?;
    let peak_real = status_kib(&status, "VmPeak:")?;
    Some(json!({
        "peak": format_megabytes(peak),
        "peak_real": format_megabytes(peak_real),
    }))
}

fn status_kib(status: &str, field: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(field))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

fn format_megabytes(kib: u64) -> String {
    let mb = (kib as f64 / 1024.0 * 100.0).round() / 100.0;
    format!("{}M", mb)
}
