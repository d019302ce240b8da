//! Application-facing entry point for manual instrumentation.
//!
//! Wraps the agent and its timeline collector so application code can time
//! operations, plug in its own collectors and report errors without knowing
//! how the agent is wired. When the agent is disabled the collector and error
//! paths become no-ops.

use apm_types::Context;
use std::sync::Arc;

use crate::config::ApmConfig;
use crate::error::ApmResult;
use crate::telemetry::agent::ApmAgent;
use crate::telemetry::measurement::MeasureOptions;
use crate::telemetry::registry::Collector;
use crate::telemetry::timeline::TimelineCollector;
use crate::telemetry::transaction::TransactionHandle;

pub struct ApmCollectorService {
    agent: Arc<ApmAgent>,
    timeline: Arc<TimelineCollector>,
    is_agent_disabled: bool,
}

impl ApmCollectorService {
    pub fn new(
        agent: Arc<ApmAgent>,
        timeline: Arc<TimelineCollector>,
        config: &ApmConfig,
        running_in_console: bool,
    ) -> Self {
        Self {
            agent,
            timeline,
            is_agent_disabled: config.is_agent_disabled(running_in_console),
        }
    }

    pub fn is_agent_disabled(&self) -> bool {
        self.is_agent_disabled
    }

    pub fn start_measure(&self, name: &str, options: MeasureOptions) {
        self.timeline.start_measure(name, options);
    }

    pub fn stop_measure(&self, name: &str, params: Context) -> ApmResult<()> {
        self.timeline.stop_measure(name, params)
    }

    /// Register an application collector with the agent.
    pub fn add_collector(&self, collector: Arc<dyn Collector>) {
        if self.is_agent_disabled {
            return;
        }
        self.agent.register_collector(collector);
    }

    pub fn capture_error(
        &self,
        error: &dyn std::error::Error,
        context: Context,
        parent: Option<&TransactionHandle>,
    ) {
        if self.is_agent_disabled {
            return;
        }
        self.agent.capture_error(error, context, parent);
    }
}
