//! Built-in collectors and the task lifecycle they hook into.

pub mod query;
pub mod scheduled_task;

pub use query::QueryCollector;
pub use scheduled_task::ScheduledTaskCollector;

use std::sync::Arc;

/// Lifecycle events of a scheduled task, as reported by the host scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    Starting,
    Skipped,
    Finished,
}

impl TaskEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEvent::Starting => "starting",
            TaskEvent::Skipped => "skipped",
            TaskEvent::Finished => "finished",
        }
    }
}

/// Something that wants to hear about scheduled task lifecycle events.
pub trait TaskListener: Send + Sync {
    fn on_start(&self, command: &str);
    fn on_skip(&self, command: &str);
    fn on_stop(&self, command: &str);
}

/// Listeners invoked synchronously, in registration order, by the host.
#[derive(Default)]
pub struct TaskLifecycle {
    listeners: Vec<Arc<dyn TaskListener>>,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn TaskListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn dispatch(&self, event: TaskEvent, command: &str) {
        log::debug!("[SCHEDULER] Task {} {}", command, event.as_str());
        for listener in &self.listeners {
            match event {
                TaskEvent::Starting => listener.on_start(command),
                TaskEvent::Skipped => listener.on_skip(command),
                TaskEvent::Finished => listener.on_stop(command),
            }
        }
    }
}
