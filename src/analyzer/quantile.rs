use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use quantiles::ckms::CKMS;

use crate::analyzer::alert::Alert;
use crate::analyzer::{check_opt_labels, StatefulAnalyzer, StatelessAnalyzer};
use crate::data::DataPair;
use crate::error::AbyssError;
use crate::metric::{ConstSummary, Desc, Labels, Metric};

/// Error tolerance used for every per-rank CKMS sketch. The `quantiles`
/// crate takes one global epsilon per sketch rather than Go's
/// per-target-epsilon API, so each rank gets its own sketch at this
/// tolerance instead.
const EPSILON: f64 = 0.01;

struct RankTarget {
    rank: f64,
    ckms: CKMS<f64>,
    alert: Option<Arc<Alert>>,
}

struct Sketch {
    count: u64,
    sum: f64,
    targets: Vec<RankTarget>,
}

impl Sketch {
    fn insert(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        for t in &mut self.targets {
            t.ckms.insert(value);
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.sum = 0.0;
        for t in &mut self.targets {
            t.ckms = CKMS::new(EPSILON);
        }
    }
}

/// Estimates targeted quantiles over observed values with a streaming CKMS
/// sketch, firing a per-rank [`Alert`] when a rank's alert rule is
/// satisfied. Usable either as a [`StatefulAnalyzer`] (one running sketch,
/// never reset) or a [`StatelessAnalyzer`] (sketch rebuilt from the window
/// on every `analyze`) — but not both over the same instance, since the two
/// modes disagree on whether `collect` resets accumulated state.
pub struct QuantileAnalyzer {
    desc: Arc<Desc>,
    sketch: Mutex<Sketch>,
}

impl QuantileAnalyzer {
    /// Builds an analyzer computing each `(rank, alert_rule)` pair in
    /// `ranks`. `alert_rule` follows the `"<op>:<threshold>:<level>"`
    /// grammar and may be `"none"`/`""` to skip alerting on that rank.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::Construction`] if `extra` reuses the
    /// `analyzer`/`quatileTarget` label names, or if any descriptor fails
    /// construction (including a rank's alert descriptor).
    pub fn new(
        parent: &Desc,
        extra: Labels,
        ranks: Vec<(f64, String)>,
    ) -> Result<Self, AbyssError> {
        check_opt_labels(&extra, &["analyzer", "quatileTarget"])?;
        let mut labels: Labels = parent.const_label_pairs().iter().cloned().collect();
        for (k, v) in extra {
            labels.insert(k, v);
        }
        labels.insert("analyzer".to_string(), "Quatile".to_string());
        let desc = Arc::new(Desc::new(
            parent.name().to_string(),
            parent.help().to_string(),
            parent.level() as u16,
            parent.priority(),
            [],
            labels,
        )?);

        let mut targets = Vec::with_capacity(ranks.len());
        for (rank, rule) in ranks {
            let extra: Labels = [("quantile_rank".to_string(), rank.to_string())]
                .into_iter()
                .collect();
            let alert = Alert::from_rule(&desc, extra, &rule)?.map(Arc::new);
            targets.push(RankTarget {
                rank,
                ckms: CKMS::new(EPSILON),
                alert,
            });
        }

        Ok(Self {
            desc,
            sketch: Mutex::new(Sketch {
                count: 0,
                sum: 0.0,
                targets,
            }),
        })
    }

    fn emit(sketch: &Sketch, desc: &Arc<Desc>, now: std::time::SystemTime, tx: &Sender<Box<dyn Metric>>) {
        if sketch.targets.is_empty() {
            return;
        }
        let quantiles: Vec<(f64, f64)> = sketch
            .targets
            .iter()
            .map(|t| (t.rank, t.ckms.query(t.rank).map_or(0.0, |(_, v)| v)))
            .collect();
        let metric = ConstSummary::new(Arc::clone(desc), sketch.count, sketch.sum, quantiles.clone());
        let _ = tx.send(Box::new(metric));

        for (t, (_, value)) in sketch.targets.iter().zip(quantiles) {
            if let Some(alert) = &t.alert {
                if alert.compare(value, now) {
                    alert.emit(tx);
                }
            }
        }
    }
}

impl StatefulAnalyzer for QuantileAnalyzer {
    fn describe(&self, tx: &Sender<Arc<Desc>>) {
        let _ = tx.send(Arc::clone(&self.desc));
    }

    fn observe(&self, pair: &DataPair) {
        let mut sketch = self.sketch.lock();
        if sketch.targets.is_empty() {
            return;
        }
        sketch.insert(pair.value);
    }

    fn collect(&self, tx: &Sender<Box<dyn Metric>>) {
        let sketch = self.sketch.lock();
        Self::emit(&sketch, &self.desc, std::time::SystemTime::now(), tx);
    }
}

impl StatelessAnalyzer for QuantileAnalyzer {
    fn describe(&self, tx: &Sender<Arc<Desc>>) {
        let _ = tx.send(Arc::clone(&self.desc));
    }

    fn analyze(&self, window: &[DataPair], tx: &Sender<Box<dyn Metric>>) {
        let mut sketch = self.sketch.lock();
        if sketch.targets.is_empty() {
            return;
        }
        for pair in window {
            sketch.insert(pair.value);
        }
        Self::emit(&sketch, &self.desc, std::time::SystemTime::now(), tx);
        sketch.reset();
    }
}
