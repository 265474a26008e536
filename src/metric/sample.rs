use std::sync::Arc;
use std::time::SystemTime;

use crate::error::AbyssError;
use crate::metric::desc::Desc;
use crate::metric::value::ValueType;

/// The payload of a [`WireMetric`] — exactly one variant is ever set, as
/// required by the downstream record shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A monotonically non-decreasing count.
    Counter(u64),
    /// A point-in-time value.
    Gauge(f64),
    /// A value tagged with the instant it was observed.
    Event {
        /// The observed value.
        value: f64,
        /// The instant of observation.
        ts: SystemTime,
    },
    /// A count/sum/quantile-map summary, as emitted by a quantile analyzer.
    Summary {
        /// Number of observations folded into this summary.
        count: u64,
        /// Sum of all observed values.
        sum: f64,
        /// `(rank, value)` pairs, sorted ascending by rank.
        quantiles: Vec<(f64, f64)>,
    },
}

/// A single label name/value pair, emitted in deterministic (lexicographic
/// on name) order.
pub type LabelPair = (String, String);

/// A serialized snapshot of a [`Metric`], ready for line-protocol rendering
/// or protobuf-style transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMetric {
    /// Label pairs, lexicographically sorted by name.
    pub labels: Vec<LabelPair>,
    /// Overridden emission timestamp, if any.
    pub timestamp: Option<SystemTime>,
    /// The payload.
    pub payload: Payload,
    /// Priority copied from the originating descriptor.
    pub priority: u16,
}

/// Anything that can describe itself with a [`Desc`] and serialize itself
/// into a [`WireMetric`]. `Write` must be safe under concurrent reads.
pub trait Metric: Send + Sync {
    /// The descriptor this metric was built from. Stable for the lifetime
    /// of the metric.
    fn desc(&self) -> &Arc<Desc>;

    /// Serializes this metric. Labels are drawn from the descriptor's const
    /// label pairs in lexicographic-on-name order.
    fn write(&self) -> Result<WireMetric, AbyssError>;
}

impl<T: Metric + ?Sized> Metric for Arc<T> {
    fn desc(&self) -> &Arc<Desc> {
        (**self).desc()
    }

    fn write(&self) -> Result<WireMetric, AbyssError> {
        (**self).write()
    }
}

fn sorted_label_pairs(desc: &Desc) -> Vec<LabelPair> {
    let mut pairs: Vec<LabelPair> = desc.const_label_pairs().to_vec();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

/// A read-only snapshot metric with a fixed value, built on the fly from a
/// [`Desc`] — the standard way `Collect` implementations emit metrics
/// without maintaining a live, mutable metric object.
pub struct ConstMetric {
    desc: Arc<Desc>,
    value_type: ValueType,
    value: f64,
}

impl ConstMetric {
    /// Builds a const metric. `value` is interpreted according to
    /// `value_type` (counters are truncated to `u64` on write).
    #[must_use]
    pub fn new(desc: Arc<Desc>, value_type: ValueType, value: f64) -> Self {
        Self {
            desc,
            value_type,
            value,
        }
    }
}

impl Metric for ConstMetric {
    fn desc(&self) -> &Arc<Desc> {
        &self.desc
    }

    fn write(&self) -> Result<WireMetric, AbyssError> {
        let payload = match self.value_type {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            ValueType::CounterValue => Payload::Counter(self.value as u64),
            ValueType::GaugeValue => Payload::Gauge(self.value),
        };
        Ok(WireMetric {
            labels: sorted_label_pairs(&self.desc),
            timestamp: None,
            payload,
            priority: self.desc.priority(),
        })
    }
}

/// Wraps any [`Metric`] and overrides its emitted timestamp.
pub struct TimeStampMetric<M> {
    inner: M,
    ts: SystemTime,
}

impl<M: Metric> TimeStampMetric<M> {
    /// Wraps `inner`, overriding its timestamp with `ts` on write.
    #[must_use]
    pub fn new(ts: SystemTime, inner: M) -> Self {
        Self { inner, ts }
    }
}

impl<M: Metric> Metric for TimeStampMetric<M> {
    fn desc(&self) -> &Arc<Desc> {
        self.inner.desc()
    }

    fn write(&self) -> Result<WireMetric, AbyssError> {
        let mut m = self.inner.write()?;
        m.timestamp = Some(self.ts);
        Ok(m)
    }
}

/// A snapshot quantile-estimate summary.
pub struct ConstSummary {
    desc: Arc<Desc>,
    count: u64,
    sum: f64,
    quantiles: Vec<(f64, f64)>,
}

impl ConstSummary {
    /// Builds a summary snapshot from `count`/`sum`/a rank→value map. The
    /// map is sorted by rank for deterministic rendering.
    #[must_use]
    pub fn new(desc: Arc<Desc>, count: u64, sum: f64, mut quantiles: Vec<(f64, f64)>) -> Self {
        quantiles.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            desc,
            count,
            sum,
            quantiles,
        }
    }
}

impl Metric for ConstSummary {
    fn desc(&self) -> &Arc<Desc> {
        &self.desc
    }

    fn write(&self) -> Result<WireMetric, AbyssError> {
        Ok(WireMetric {
            labels: sorted_label_pairs(&self.desc),
            timestamp: None,
            payload: Payload::Summary {
                count: self.count,
                sum: self.sum,
                quantiles: self.quantiles.clone(),
            },
            priority: self.desc.priority(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::desc::Labels;

    fn desc() -> Arc<Desc> {
        Desc::new_arc("x", "h", 3, 7, [], Labels::new()).unwrap()
    }

    #[test]
    fn const_metric_counter_roundtrip_is_stable() {
        let m = ConstMetric::new(desc(), ValueType::CounterValue, 3.0);
        let a = m.write().unwrap();
        let b = m.write().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.payload, Payload::Counter(3));
        assert_eq!(a.priority, 7);
    }

    #[test]
    fn timestamp_metric_overrides_ts() {
        let inner = ConstMetric::new(desc(), ValueType::GaugeValue, 1.5);
        let ts = SystemTime::UNIX_EPOCH;
        let wrapped = TimeStampMetric::new(ts, inner);
        let wm = wrapped.write().unwrap();
        assert_eq!(wm.timestamp, Some(ts));
        assert_eq!(wm.payload, Payload::Gauge(1.5));
    }

    #[test]
    fn const_summary_sorts_quantiles_by_rank() {
        let s = ConstSummary::new(desc(), 10, 5.0, vec![(0.9, 0.1), (0.5, 0.2)]);
        let wm = s.write().unwrap();
        match wm.payload {
            Payload::Summary { quantiles, .. } => {
                assert_eq!(quantiles, vec![(0.5, 0.2), (0.9, 0.1)]);
            }
            _ => panic!("expected summary"),
        }
    }
}
