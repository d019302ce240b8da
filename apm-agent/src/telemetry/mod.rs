//! Transaction/span collection core.
//!
//! Measurements are recorded against the innermost open transaction; when a
//! transaction stops, every registered collector is drained for its name and
//! the results are converted into span events.
//!
//! Philosophy: "Collectors buffer, the agent drains at transaction boundaries."

pub mod agent;
pub mod client;
pub mod clock;
pub mod context;
pub mod event;
pub mod export;
pub mod measurement;
pub mod memory;
pub mod registry;
pub mod stack;
pub mod timeline;
pub mod transaction;


// Re-export key types for convenience
pub use agent::ApmAgent;
pub use client::{EventSink, TransactionProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::ApmContext;
pub use export::JsonLinesSink;
pub use measurement::{MeasureOptions, Measurement, PendingMeasure};
pub use memory::InMemoryAgent;
pub use registry::{Collector, CollectorRegistry};
pub use stack::TransactionStack;
pub use timeline::TimelineCollector;
pub use transaction::{Transaction, TransactionHandle};
