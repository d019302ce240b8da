use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::measurement::Measurement;
use crate::error::ApmResult;

/// Trait that all collectors must implement
pub trait Collector: Send + Sync {
    /// Stable registry key
    fn name(&self) -> &str;

    /// Finished measurements attached to `transaction_name`, in recording order.
    ///
    /// An empty name asks for measurements recorded while no transaction was open.
    fn collect(&self, transaction_name: &str) -> ApmResult<Vec<Measurement>>;

    /// Drop every buffered measurement. Called between units of work when an
    /// agent is reused.
    fn reset(&self) {}
}

/// Registry that holds all active collectors, keyed by name.
/// Uses interior mutability (RwLock) so collectors can be added from
/// application code holding only a shared reference to the agent.
pub struct CollectorRegistry {
    collectors: RwLock<BTreeMap<String, Arc<dyn Collector>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        CollectorRegistry {
            collectors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a collector, replacing any previous one with the same name
    pub fn register(&self, collector: Arc<dyn Collector>) {
        let name = collector.name().to_string();
        if self.collectors.write().insert(name.clone(), collector).is_some() {
            log::warn!("[APM] Replaced collector: {}", name);
        } else {
            log::debug!("[APM] Registered collector: {}", name);
        }
    }

    /// Unregister a collector by name. Returns true if it was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.collectors.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collectors.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.collectors.read().keys().cloned().collect()
    }

    /// All collectors, ordered by name
    pub fn list(&self) -> Vec<Arc<dyn Collector>> {
        self.collectors.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }

    pub fn reset_all(&self) {
        for collector in self.list() {
            collector.reset();
        }
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_types::Context;
    use parking_lot::Mutex;

    struct FixedCollector {
        name: String,
        measures: Mutex<Vec<Measurement>>,
    }

    impl FixedCollector {
        fn new(name: &str, count: usize) -> Self {
            let measures = (0..count)
                .map(|i| {
                    Measurement::from_offsets(
                        format!("m{}", i),
                        0.0,
                        0.001,
                        "custom",
                        None,
                        Context::new(),
                        "req",
                    )
                })
                .collect();
            Self {
                name: name.to_string(),
                measures: Mutex::new(measures),
            }
        }
    }

    impl Collector for FixedCollector {
        fn name(&self) -> &str {
            &self.name
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

    #[test]
    fn test_register_lookup_unregister() {
        let registry = CollectorRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(FixedCollector::new("b", 1)));
        registry.register(Arc::new(FixedCollector::new("a", 2)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.contains("a"));
        assert_eq!(registry.get("a").unwrap().collect("req").unwrap().len(), 2);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_same_name_replaces() {
        let registry = CollectorRegistry::new();
        registry.register(Arc::new(FixedCollector::new("x", 1)));
        registry.register(Arc::new(FixedCollector::new("x", 3)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("x").unwrap().collect("req").unwrap().len(), 3);
    }

    #[test]
    fn test_reset_all() {
        let registry = CollectorRegistry::new();
        registry.register(Arc::new(FixedCollector::new("x", 3)));
        registry.reset_all();
        assert!(registry.get("x").unwrap().collect("req").unwrap().is_empty());
    }
}
