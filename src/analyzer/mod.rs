//! Stateful (streaming) and stateless (windowed) analyzers, plus the
//! [`Alert`] metric both families can derive.

pub mod aggregation;
pub mod alert;
pub mod quantile;

use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::data::DataPair;
use crate::metric::{Desc, Metric};

pub use aggregation::{AggKind, Aggregation, AggregationOpts};
pub use alert::{Alert, AlertOp};
pub use quantile::QuantileAnalyzer;

/// Consumes each sample online as it arrives and emits its current state on
/// `collect`. Observation order matches arrival order
/// within one pusher.
pub trait StatefulAnalyzer: Send + Sync {
    /// Sends every descriptor this analyzer may ever emit.
    fn describe(&self, tx: &Sender<Arc<Desc>>);

    /// Folds one newly-arrived sample into the analyzer's running state.
    fn observe(&self, pair: &DataPair);

    /// Emits the analyzer's current state without resetting it.
    fn collect(&self, tx: &Sender<Box<dyn Metric>>);
}

/// Receives the pusher's current in-window snapshot once per `Gather` cycle
/// and emits a one-shot result. Must treat `window` as read-only.
pub trait StatelessAnalyzer: Send + Sync {
    /// Sends every descriptor this analyzer may ever emit.
    fn describe(&self, tx: &Sender<Arc<Desc>>);

    /// Analyzes the given window snapshot and emits zero or more metrics.
    fn analyze(&self, window: &[DataPair], tx: &Sender<Box<dyn Metric>>);
}

/// Rejects label names an analyzer reserves for its own injected labels.
pub(crate) fn check_opt_labels(
    labels: &crate::metric::Labels,
    illegal_names: &[&str],
) -> Result<(), crate::error::AbyssError> {
    for name in illegal_names {
        if labels.contains_key(*name) {
            return Err(crate::error::AbyssError::Construction(format!(
                "label name {name:?} is reserved"
            )));
        }
    }
    Ok(())
}
