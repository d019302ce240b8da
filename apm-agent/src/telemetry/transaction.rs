//! Transactions as tracked by a [`TransactionProvider`](super::TransactionProvider).

use apm_types::{Context, TransactionRecord};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use super::measurement::to_milliseconds;

/// A named unit of work with a start, an optional end and an optional parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub name: String,
    pub context: Context,
    /// Seconds since the Unix epoch
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub parent_id: Option<String>,
    pub meta: Context,
    pub custom_context: Context,
}

impl Transaction {
    pub fn new(name: impl Into<String>, context: Context, start_time: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            context,
            start_time,
            end_time: None,
            parent_id: None,
            meta: Context::new(),
            custom_context: Context::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.end_time.map(|end| to_milliseconds(end - self.start_time))
    }

    pub fn to_record(&self) -> TransactionRecord {
        let mut context = self.context.clone();
        if !self.custom_context.is_empty() {
            context.insert("custom".to_string(), Value::Object(self.custom_context.clone()));
        }

        TransactionRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            parent_id: self.parent_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms: self.duration_ms(),
            result: self.meta.get("result").map(|r| match r {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            context,
            meta: self.meta.clone(),
        }
    }
}

/// Shared handle to a transaction owned by a provider.
///
/// Clones refer to the same transaction.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    inner: Arc<RwLock<Transaction>>,
}

impl TransactionHandle {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            inner: Arc::new(RwLock::new(transaction)),
        }
    }

    pub fn id(&self) -> String {
        self.inner.read().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    pub fn start_time(&self) -> f64 {
        self.inner.read().start_time
    }

    pub fn parent_id(&self) -> Option<String> {
        self.inner.read().parent_id.clone()
    }

    /// Link this transaction as a child of `parent`.
    pub fn set_parent(&self, parent: &TransactionHandle) {
        let parent_id = parent.id();
        self.inner.write().parent_id = Some(parent_id);
    }

    /// Merge keys into the transaction metadata.
    pub fn set_meta(&self, meta: Context) {
        self.inner.write().meta.extend(meta);
    }

    pub fn set_custom_context(&self, context: Context) {
        self.inner.write().custom_context.extend(context);
    }

    /// Record the end time and attach stop metadata.
    pub fn finish(&self, end_time: f64, meta: Context) {
        let mut transaction = self.inner.write();
        transaction.end_time = Some(end_time);
        transaction.meta.extend(meta);
    }

    pub fn is_finished(&self) -> bool {
        self.inner.read().end_time.is_some()
    }

    pub fn snapshot(&self) -> Transaction {
        self.inner.read().clone()
    }

    /// Whether two handles point at the same transaction.
    pub fn same_as(&self, other: &TransactionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
