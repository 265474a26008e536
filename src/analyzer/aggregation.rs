use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::analyzer::alert::Alert;
use crate::analyzer::{check_opt_labels, StatelessAnalyzer};
use crate::data::DataPair;
use crate::error::AbyssError;
use crate::metric::{ConstMetric, Desc, Labels, Metric, TimeStampMetric, ValueType};

/// Which reduction an [`Aggregation`] performs over its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    /// The largest observed value.
    Max,
    /// The smallest observed value.
    Min,
}

impl AggKind {
    fn parse(s: &str) -> Result<Self, AbyssError> {
        match s {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(AbyssError::Construction(format!(
                "aggregation {other:?} does not exist"
            ))),
        }
    }

    // Scans right-to-left so the latest sample wins on a value tie.
    fn reduce(self, data: &[DataPair]) -> DataPair {
        let last = data[data.len() - 1];
        let rest = &data[..data.len() - 1];
        match self {
            Self::Max => rest
                .iter()
                .rev()
                .fold(last, |a, b| if b.value > a.value { *b } else { a }),
            Self::Min => rest
                .iter()
                .rev()
                .fold(last, |a, b| if b.value < a.value { *b } else { a }),
        }
    }
}

/// Options used to build an [`Aggregation`].
pub struct AggregationOpts {
    /// Reduction to apply.
    pub kind: AggKind,
    /// How far back from `now` the window extends. Must not exceed 10
    /// minutes in either direction.
    pub duration: Duration,
    /// Optional alert rule evaluated against the aggregated result.
    pub alert_rule: Option<String>,
}

/// A stateless analyzer reducing the most recent `duration` of a window to
/// a single value (its max or min), rate-limited to fire at most once per
/// `duration`.
#[derive(Debug)]
pub struct Aggregation {
    desc: Arc<Desc>,
    duration: Duration,
    kind: AggKind,
    last_analyze: Mutex<SystemTime>,
    alert: Option<Arc<Alert>>,
}

impl Aggregation {
    /// Builds an aggregation analyzer. `extra` must not reuse the
    /// `analyzer`/`analyzer_duration` label names, which this constructor
    /// injects itself.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::Construction`] if `opts.duration` exceeds 10
    /// minutes, if `extra` collides with a reserved label name, or if
    /// descriptor construction fails.
    pub fn new(parent: &Desc, extra: Labels, opts: AggregationOpts) -> Result<Self, AbyssError> {
        if opts.duration > Duration::from_secs(600) {
            return Err(AbyssError::Construction(
                "aggregation duration must not exceed 10 minutes".to_string(),
            ));
        }
        check_opt_labels(&extra, &["analyzer", "analyzer_duration"])?;

        let kind_name = match opts.kind {
            AggKind::Max => "max",
            AggKind::Min => "min",
        };
        let mut labels: Labels = parent.const_label_pairs().iter().cloned().collect();
        for (k, v) in extra {
            labels.insert(k, v);
        }
        labels.insert("analyzer".to_string(), kind_name.to_string());
        labels.insert(
            "analyzer_duration".to_string(),
            humantime::format_duration(opts.duration).to_string(),
        );
        let desc = Arc::new(Desc::new(
            parent.name().to_string(),
            parent.help().to_string(),
            parent.level() as u16,
            parent.priority(),
            [],
            labels,
        )?);

        let alert = match &opts.alert_rule {
            Some(rule) => Alert::from_rule(&desc, Labels::new(), rule)?.map(Arc::new),
            None => None,
        };

        Ok(Self {
            desc,
            duration: opts.duration,
            kind: opts.kind,
            last_analyze: Mutex::new(SystemTime::UNIX_EPOCH),
            alert,
        })
    }

    /// Parses a `"max"`/`"min"` kind string, mirroring the YAML config
    /// shape's `type` field.
    pub fn parse_kind(s: &str) -> Result<AggKind, AbyssError> {
        AggKind::parse(s)
    }
}

impl StatelessAnalyzer for Aggregation {
    fn describe(&self, tx: &Sender<Arc<Desc>>) {
        let _ = tx.send(Arc::clone(&self.desc));
    }

    fn analyze(&self, window: &[DataPair], tx: &Sender<Box<dyn Metric>>) {
        if window.is_empty() {
            return;
        }

        let now = SystemTime::now();
        let cutoff = now
            .checked_sub(self.duration)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        {
            let mut last_analyze = self.last_analyze.lock();
            if cutoff < *last_analyze {
                return;
            }
            *last_analyze = now;
        }

        let start = window.partition_point(|d| d.ts <= cutoff);
        if start >= window.len() {
            return;
        }

        let reduced = self.kind.reduce(&window[start..]);
        let metric = ConstMetric::new(Arc::clone(&self.desc), ValueType::GaugeValue, reduced.value);
        let _ = tx.send(Box::new(TimeStampMetric::new(now, metric)));

        if let Some(alert) = &self.alert {
            if alert.compare(reduced.value, now) {
                alert.emit(tx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(v: f64, secs_ago: u64) -> DataPair {
        DataPair::new(v, SystemTime::now() - Duration::from_secs(secs_ago))
    }

    fn aggregation(kind: AggKind, duration_secs: u64) -> Aggregation {
        Aggregation::new(
            &Desc::new("x", "h", 3, 0, [], Labels::new()).unwrap(),
            Labels::new(),
            AggregationOpts {
                kind,
                duration: Duration::from_secs(duration_secs),
                alert_rule: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_duration_over_ten_minutes() {
        let err = Aggregation::new(
            &Desc::new("x", "h", 3, 0, [], Labels::new()).unwrap(),
            Labels::new(),
            AggregationOpts {
                kind: AggKind::Max,
                duration: Duration::from_secs(601),
                alert_rule: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AbyssError::Construction(_)));
    }

    #[test]
    fn max_picks_largest_value_within_window() {
        let agg = aggregation(AggKind::Max, 60);
        let window = vec![pair(1.0, 5), pair(9.0, 3), pair(2.0, 1)];
        let (tx, rx) = crossbeam::channel::unbounded();
        agg.analyze(&window, &tx);
        drop(tx);
        let metrics: Vec<_> = rx.iter().collect();
        assert_eq!(metrics.len(), 1);
        let wire = metrics[0].write().unwrap();
        assert_eq!(wire.payload, crate::metric::Payload::Gauge(9.0));
    }

    #[test]
    fn rate_limits_to_at_most_once_per_duration() {
        let agg = aggregation(AggKind::Max, 300);
        let window = vec![pair(1.0, 1)];
        let (tx, rx) = crossbeam::channel::unbounded();
        agg.analyze(&window, &tx);
        agg.analyze(&window, &tx);
        drop(tx);
        assert_eq!(rx.iter().count(), 1);
    }

    #[test]
    fn firing_alert_rule_emits_alongside_the_gauge() {
        let agg = Aggregation::new(
            &Desc::new("x", "h", 3, 0, [], Labels::new()).unwrap(),
            Labels::new(),
            AggregationOpts {
                kind: AggKind::Max,
                duration: Duration::from_secs(60),
                alert_rule: Some("bigger:5:2".to_string()),
            },
        )
        .unwrap();
        let window = vec![pair(9.0, 1)];
        let (tx, rx) = crossbeam::channel::unbounded();
        agg.analyze(&window, &tx);
        drop(tx);
        assert_eq!(rx.iter().count(), 2);
    }

    #[test]
    fn empty_window_never_emits() {
        let agg = aggregation(AggKind::Min, 60);
        let (tx, rx) = crossbeam::channel::unbounded();
        agg.analyze(&[], &tx);
        drop(tx);
        assert_eq!(rx.iter().count(), 0);
    }
}
