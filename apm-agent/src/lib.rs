//! Transaction and span collection for application performance monitoring.
//!
//! Application code opens named transactions on an [`ApmAgent`], records timed
//! measurements against whichever transaction is currently open, and every
//! registered [`Collector`] is drained into span events when a transaction
//! closes.

pub mod collectors;
pub mod config;
pub mod error;
pub mod service;
pub mod telemetry;

pub use config::ApmConfig;
pub use error::{ApmError, ApmResult};
pub use service::ApmCollectorService;
pub use telemetry::{
    ApmAgent, ApmContext, Clock, Collector, CollectorRegistry, EventSink, InMemoryAgent,
    JsonLinesSink, ManualClock, MeasureOptions, Measurement, SystemClock, TimelineCollector,
    TransactionHandle, TransactionProvider, TransactionStack,
};

pub use apm_types::{Context, ErrorEvent, ExportRecord, SpanEvent, TransactionRecord};
