//! Metric identity (`Desc`), typed sample snapshots (`Metric`/`Sample`), and
//! the family grouping used by `Registry::gather`.

pub mod desc;
pub mod family;
pub mod sample;
pub mod value;

pub use desc::{Desc, Labels, MetricLevel};
pub use family::{normalize_metric_families, process_metric, MetricFamily, MetricType};
pub use sample::{ConstMetric, ConstSummary, Metric, Payload, TimeStampMetric, WireMetric};
pub use value::ValueType;
