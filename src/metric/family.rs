use std::collections::BTreeMap;

use crate::error::AbyssError;
use crate::metric::desc::MetricLevel;
use crate::metric::sample::{Payload, WireMetric};

/// The wire type of a [`MetricFamily`], mirroring the downstream
/// record shape. `Histogram` has no producer in this crate yet (no
/// analyzer emits it) but is kept in the enum because the downstream
/// record format names it as a legal family type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonically non-decreasing count.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// A value tagged with the instant it fired.
    Event,
    /// Count/sum/quantile-map summary.
    Summary,
    /// Reserved for future histogram-bucket producers.
    Histogram,
}

impl MetricType {
    fn of(payload: &Payload) -> Self {
        match payload {
            Payload::Counter(_) => Self::Counter,
            Payload::Gauge(_) => Self::Gauge,
            Payload::Event { .. } => Self::Event,
            Payload::Summary { .. } => Self::Summary,
        }
    }
}

/// A group of metrics sharing a name and type — the unit of `Gather`
/// output.
#[derive(Debug, Clone)]
pub struct MetricFamily {
    /// The shared metric name.
    pub name: String,
    /// The shared wire type.
    pub metric_type: MetricType,
    /// Member metrics, in the order they were produced by `Gather`'s
    /// consumer loop.
    pub metrics: Vec<WireMetric>,
}

/// Folds one collected [`WireMetric`] into `families_by_name`, type-checking
/// it against any prior metric under the same name. A type mismatch is
/// reported as an error but never removes already-accumulated data.
pub fn process_metric(
    name: &str,
    metric: WireMetric,
    families_by_name: &mut BTreeMap<String, MetricFamily>,
) -> Result<(), AbyssError> {
    let incoming_type = MetricType::of(&metric.payload);

    match families_by_name.get_mut(name) {
        Some(family) => {
            if family.metric_type != incoming_type {
                return Err(AbyssError::Construction(format!(
                    "collected metric {name} should be a {:?}, got {:?}",
                    family.metric_type, incoming_type
                )));
            }
            family.metrics.push(metric);
        }
        None => {
            families_by_name.insert(
                name.to_string(),
                MetricFamily {
                    name: name.to_string(),
                    metric_type: incoming_type,
                    metrics: vec![metric],
                },
            );
        }
    }
    Ok(())
}

/// Bucketizes gathered families by severity level. Every family currently
/// lands in bucket `0` — this is the hook point reserved for
/// future level-based routing; the bucket key is `u8` so a future revision
/// can key it directly off [`MetricLevel`] without changing callers.
#[must_use]
pub fn normalize_metric_families(
    families_by_name: BTreeMap<String, MetricFamily>,
) -> BTreeMap<u8, Vec<MetricFamily>> {
    let mut out = BTreeMap::new();
    if !families_by_name.is_empty() {
        out.insert(0u8, families_by_name.into_values().collect());
    }
    out
}

/// Placeholder conversion kept for call sites that want to key future
/// buckets directly off a descriptor's level.
#[must_use]
pub fn level_bucket(level: MetricLevel) -> u8 {
    level as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn gauge(v: f64) -> WireMetric {
        WireMetric {
            labels: vec![],
            timestamp: Some(SystemTime::now()),
            payload: Payload::Gauge(v),
            priority: 0,
        }
    }

    fn counter(v: u64) -> WireMetric {
        WireMetric {
            labels: vec![],
            timestamp: None,
            payload: Payload::Counter(v),
            priority: 0,
        }
    }

    #[test]
    fn groups_by_name_and_checks_type() {
        let mut families = BTreeMap::new();
        process_metric("x", gauge(1.0), &mut families).unwrap();
        process_metric("x", gauge(2.0), &mut families).unwrap();
        assert_eq!(families["x"].metrics.len(), 2);

        let err = process_metric("x", counter(3), &mut families);
        assert!(err.is_err());
        // the mismatched metric is not appended
        assert_eq!(families["x"].metrics.len(), 2);
    }

    #[test]
    fn normalize_puts_everything_in_bucket_zero() {
        let mut families = BTreeMap::new();
        process_metric("x", gauge(1.0), &mut families).unwrap();
        let buckets = normalize_metric_families(families);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[&0].len(), 1);
    }

    #[test]
    fn normalize_empty_input_yields_no_buckets() {
        let buckets = normalize_metric_families(BTreeMap::new());
        assert!(buckets.is_empty());
    }
}
