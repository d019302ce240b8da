//! Shared types for the APM agent and the exporters that consume its events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open key/value bag attached to spans, transactions and errors.
pub type Context = Map<String, Value>;

// =====================================================
// Exported Events
// =====================================================

/// A finished span, ready to hand to an exporter.
///
/// `start` is the offset from the owning transaction's start time and
/// `duration` the span length, both in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub id: String,
    pub transaction_id: String,
    pub transaction_name: String,
    pub parent_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub span_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub context: Context,
    pub start: f64,
    pub duration: f64,
}

/// A captured application error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

/// Snapshot of a transaction as the agent last saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Seconds since the Unix epoch
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub meta: Context,
}

/// One line of an exported stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportRecord {
    Span(SpanEvent),
    Error(ErrorEvent),
    Transaction(TransactionRecord),
}
