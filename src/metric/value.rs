/// The kind of scalar value a [`crate::metric::ConstMetric`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A monotonically non-decreasing value, rendered as a `Counter` wire
    /// payload.
    CounterValue,
    /// An instantaneous value, rendered as a `Gauge` wire payload.
    GaugeValue,
}
