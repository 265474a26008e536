use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Sender};
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::error::{AbyssError, MultiError};
use crate::metric::{normalize_metric_families, process_metric, Desc, Metric, MetricFamily};

const CAP_DESC_CHAN: usize = 10;
const CAP_METRIC_CHAN: usize = 100;

/// Anything that can be registered with a [`Registry`] for collection.
///
/// `describe` sends the superset of descriptors this collector can ever
/// produce and returns once the last one has been sent; `collect` sends
/// metrics for the current Gather cycle and returns once the last one has
/// been sent. Both must be safe to call concurrently.
pub trait Collector: Send + Sync {
    /// Sends every descriptor this collector may ever emit.
    fn describe(&self, tx: &Sender<Arc<Desc>>);

    /// Sends this cycle's metrics.
    fn collect(&self, tx: &Sender<Box<dyn Metric>>);
}

struct RegistryInner {
    collectors_by_id: HashMap<u64, Arc<dyn Collector>>,
    desc_ids: HashSet<u64>,
}

/// Owns a set of collectors, enforces descriptor uniqueness, and gathers
/// their samples into typed metric families.
///
/// `collectors_by_id`/`desc_ids` are protected by a single read-write lock:
/// readers (the `Gather` snapshot) take a read lock, `Register`/`Unregister`
/// take a write lock and are thus serialized with respect to each other and
/// to snapshotting.
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                collectors_by_id: HashMap::new(),
                desc_ids: HashSet::new(),
            }),
        }
    }

    fn describe_collector(c: &Arc<dyn Collector>) -> (u64, HashSet<u64>) {
        let (tx, rx) = bounded::<Arc<Desc>>(CAP_DESC_CHAN);
        let c = Arc::clone(c);
        thread::spawn(move || c.describe(&tx));

        let mut ids = HashSet::new();
        let mut collector_id = 0u64;
        for desc in rx.iter() {
            if ids.insert(desc.id()) {
                collector_id ^= desc.id();
            }
        }
        (collector_id, ids)
    }

    /// Registers `c`.
    ///
    /// Drains `c.describe()` on a background thread under the registry's
    /// write lock, computing `collector_id` as the XOR of its distinct
    /// descriptor ids. The whole descriptor stream is always drained before
    /// any error is returned, so the producing thread never blocks forever
    /// on a full channel.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::AlreadyRegistered`] if an equal collector
    /// (same descriptor set) is already registered, or
    /// [`AbyssError::DuplicateDescriptor`] if a descriptor id collides with
    /// one from a *different* already-registered collector.
    pub fn register(&self, c: Arc<dyn Collector>) -> Result<(), AbyssError> {
        let (tx, rx) = bounded::<Arc<Desc>>(CAP_DESC_CHAN);
        let c_for_describe = Arc::clone(&c);
        thread::spawn(move || c_for_describe.describe(&tx));

        let mut inner = self.inner.write();

        let mut new_desc_ids = HashSet::new();
        let mut collector_id = 0u64;
        let mut duplicate_desc_err: Option<AbyssError> = None;

        for desc in rx.iter() {
            let id = desc.id();
            if inner.desc_ids.contains(&id) && duplicate_desc_err.is_none() {
                duplicate_desc_err = Some(AbyssError::DuplicateDescriptor(desc.to_string()));
            }
            if new_desc_ids.insert(id) {
                collector_id ^= id;
            }
        }

        if let Some(existing) = inner.collectors_by_id.get(&collector_id) {
            return Err(AbyssError::AlreadyRegistered {
                collector_id,
                existing: Arc::clone(existing),
                new: c,
            });
        }

        if let Some(err) = duplicate_desc_err {
            return Err(err);
        }

        inner.collectors_by_id.insert(collector_id, c);
        inner.desc_ids.extend(new_desc_ids);
        trace!(collector_id, "registered collector");
        Ok(())
    }

    /// Unregisters the collector equal to `c` (same descriptor set), if
    /// any. A no-op if no such collector is registered.
    pub fn unregister(&self, c: &Arc<dyn Collector>) {
        let (collector_id, desc_ids) = Self::describe_collector(c);

        let mut inner = self.inner.write();
        if inner.collectors_by_id.remove(&collector_id).is_some() {
            for id in desc_ids {
                inner.desc_ids.remove(&id);
            }
            trace!(collector_id, "unregistered collector");
        }
    }

    /// Calls `Collect` on every registered collector and gathers the
    /// results into typed, uniquely-named metric families.
    ///
    /// Always attempts to gather as much as possible: a type mismatch
    /// between two metrics sharing a name is recorded in the returned
    /// [`MultiError`] without dropping either collector's other metrics or
    /// aborting the gather.
    pub fn gather(&self) -> (BTreeMap<u8, Vec<MetricFamily>>, MultiError) {
        let collectors: Vec<Arc<dyn Collector>> = {
            let inner = self.inner.read();
            inner.collectors_by_id.values().cloned().collect()
        };

        let mut errs = MultiError::new();
        if collectors.is_empty() {
            return (BTreeMap::new(), errs);
        }

        let n = collectors.len();
        let (coll_tx, coll_rx) = bounded::<Arc<dyn Collector>>(n);
        for c in collectors {
            // Capacity equals the number of collectors, so this never blocks.
            let _ = coll_tx.send(c);
        }
        drop(coll_tx);

        let (metric_tx, metric_rx) = bounded::<Box<dyn Metric>>(CAP_METRIC_CHAN);

        // Bound worker parallelism at N = |collectors|; each worker drains
        // the shared collector queue until empty. The metric channel closes
        // once every worker (and the registry's own sender) has dropped its
        // sender clone, which the final join loop guarantees.
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let coll_rx = coll_rx.clone();
                let metric_tx = metric_tx.clone();
                thread::spawn(move || {
                    while let Ok(collector) = coll_rx.recv() {
                        collector.collect(&metric_tx);
                    }
                })
            })
            .collect();
        drop(metric_tx);
        drop(coll_rx);

        let mut families_by_name = BTreeMap::new();
        for metric in metric_rx.iter() {
            let name = metric.desc().name().to_string();
            match metric.write() {
                Ok(wire) => {
                    if let Err(e) = process_metric(&name, wire, &mut families_by_name) {
                        warn!(metric = %name, error = %e, "collection error");
                        errs.push(e);
                    }
                }
                Err(e) => {
                    warn!(metric = %name, error = %e, "failed writing metric");
                    errs.push(e);
                }
            }
        }

        for h in handles {
            let _ = h.join();
        }

        (normalize_metric_families(families_by_name), errs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{ConstMetric, Labels, ValueType};

    struct FixedCollector {
        desc: Arc<Desc>,
        value: f64,
    }

    impl Collector for FixedCollector {
        fn describe(&self, tx: &Sender<Arc<Desc>>) {
            let _ = tx.send(self.desc.clone());
        }

        fn collect(&self, tx: &Sender<Box<dyn Metric>>) {
            let _ = tx.send(Box::new(ConstMetric::new(
                self.desc.clone(),
                ValueType::GaugeValue,
                self.value,
            )));
        }
    }

    fn collector(name: &str, const_labels: &[(&str, &str)], value: f64) -> Arc<dyn Collector> {
        let labels: Labels = const_labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(FixedCollector {
            desc: Desc::new_arc(name, "help", 3, 0, [], labels).unwrap(),
            value,
        })
    }

    #[test]
    fn register_then_unregister_is_a_no_op() {
        let registry = Registry::new();
        let c = collector("x", &[("a", "1")], 1.0);
        registry.register(c.clone()).unwrap();
        assert_eq!(registry.inner.read().collectors_by_id.len(), 1);
        registry.unregister(&c);
        assert!(registry.inner.read().collectors_by_id.is_empty());
        assert!(registry.inner.read().desc_ids.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        let a = collector("x", &[("a", "1")], 1.0);
        registry.register(a.clone()).unwrap();
        let err = registry.register(a).unwrap_err();
        assert!(matches!(err, AbyssError::AlreadyRegistered { .. }));
    }

    #[test]
    fn duplicate_descriptor_across_collectors_is_rejected() {
        let registry = Registry::new();
        let a = collector("x", &[("a", "1")], 1.0);
        let b = collector("x", &[("a", "1")], 2.0);
        registry.register(a).unwrap();
        let err = registry.register(b).unwrap_err();
        assert!(matches!(err, AbyssError::DuplicateDescriptor(_)));
    }

    #[test]
    fn gather_groups_metrics_by_name() {
        let registry = Registry::new();
        registry
            .register(collector("x", &[("a", "1")], 1.0))
            .unwrap();
        registry
            .register(collector("x", &[("a", "2")], 2.0))
            .unwrap();
        registry
            .register(collector("y", &[("a", "1")], 3.0))
            .unwrap();

        let (buckets, errs) = registry.gather();
        assert!(errs.is_empty());
        let families = &buckets[&0];
        let x = families.iter().find(|f| f.name == "x").unwrap();
        assert_eq!(x.metrics.len(), 2);
        let y = families.iter().find(|f| f.name == "y").unwrap();
        assert_eq!(y.metrics.len(), 1);
    }

    #[test]
    fn gather_on_empty_registry_yields_no_buckets() {
        let registry = Registry::new();
        let (buckets, errs) = registry.gather();
        assert!(buckets.is_empty());
        assert!(errs.is_empty());
    }
}
