//! Timed measurements recorded by collectors.
//!
//! A measurement starts as a [`PendingMeasure`] (start offset known, end
//! unknown) and is promoted to a finished [`Measurement`] once stopped.

use apm_types::Context;
use serde::{Deserialize, Serialize};

/// Default classification for measures that don't say otherwise.
pub const DEFAULT_TYPE: &str = "request";

/// Action recorded by `add_measure` when none is given.
pub const DEFAULT_ACTION: &str = "request";

/// Optional arguments to `TimelineCollector::start_measure`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureOptions {
    pub span_type: String,
    pub action: Option<String>,
    /// Export name; the measure name is used when absent
    pub label: Option<String>,
    /// Absolute start in seconds; "now" when absent
    pub start_time: Option<f64>,
}

impl Default for MeasureOptions {
    fn default() -> Self {
        Self {
            span_type: DEFAULT_TYPE.to_string(),
            action: None,
            label: None,
            start_time: None,
        }
    }
}

impl MeasureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = span_type.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn started_at(mut self, seconds: f64) -> Self {
        self.start_time = Some(seconds);
        self
    }
}

/// A started, not yet stopped, measure.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMeasure {
    pub label: String,
    /// Seconds relative to the origin of `transaction`
    pub start: f64,
    pub span_type: String,
    pub action: Option<String>,
    /// Transaction open when the measure began; empty when none was
    pub transaction: String,
}

/// A finished measurement. `start` and `duration` are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub label: String,
    #[serde(rename = "type")]
    pub span_type: String,
    pub action: Option<String>,
    pub context: Context,
    pub start: f64,
    pub duration: f64,
    pub transaction: String,
}

impl Measurement {
    /// Build a finished record from offsets in seconds.
    pub fn from_offsets(
        label: impl Into<String>,
        start: f64,
        end: f64,
        span_type: impl Into<String>,
        action: Option<String>,
        context: Context,
        transaction: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            span_type: span_type.into(),
            action,
            context,
            start: to_milliseconds(start),
            duration: to_milliseconds(end - start),
            transaction: transaction.into(),
        }
    }

    /// Whether this measure was recorded outside of any transaction.
    pub fn is_unattached(&self) -> bool {
        self.transaction.is_empty()
    }

    /// End offset in milliseconds.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Seconds to milliseconds, rounded to 3 decimals (half away from zero).
pub fn to_milliseconds(seconds: f64) -> f64 {
    (seconds * 1000.0 * 1000.0).round() / 1000.0
}
