//! End-to-end scenarios exercising the collection pipeline and the
//! supervisor lifecycle purely through the public API.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use abyss::analyzer::{AggKind, Aggregation, AggregationOpts, QuantileAnalyzer, StatelessAnalyzer};
use abyss::data::DataPair;
use abyss::error::AbyssError;
use abyss::metric::{Desc, Labels, Metric, Payload};
use abyss::registry::{Collector, Registry};

fn parent(name: &str) -> Arc<Desc> {
    Desc::new_arc(name, "help", 3, 0, [], Labels::new()).unwrap()
}

fn series(values: &[f64], step: Duration) -> Vec<DataPair> {
    let base = SystemTime::now() - step * (values.len() as u32);
    values
        .iter()
        .enumerate()
        .map(|(i, v)| DataPair::new(*v, base + step * (i as u32 + 1)))
        .collect()
}

fn payload_of(m: &dyn Metric) -> Payload {
    m.write().unwrap().payload
}

#[test]
fn min_aggregation_over_a_known_sequence() {
    let window = series(
        &[0.1, 0.2, 0.3, 0.4, 0.1, 0.2, 0.3, 0.4],
        Duration::from_millis(500),
    );
    let agg = Aggregation::new(
        &parent("x"),
        Labels::new(),
        AggregationOpts {
            kind: AggKind::Min,
            duration: Duration::from_secs(5),
            alert_rule: None,
        },
    )
    .unwrap();

    let (tx, rx) = crossbeam::channel::unbounded();
    agg.analyze(&window, &tx);
    drop(tx);

    let metrics: Vec<_> = rx.iter().collect();
    assert_eq!(metrics.len(), 1);
    assert_eq!(payload_of(metrics[0].as_ref()), Payload::Gauge(0.1));
}

#[test]
fn max_aggregation_over_the_same_sequence() {
    let window = series(
        &[0.1, 0.2, 0.3, 0.4, 0.1, 0.2, 0.3, 0.4],
        Duration::from_millis(500),
    );
    let agg = Aggregation::new(
        &parent("x"),
        Labels::new(),
        AggregationOpts {
            kind: AggKind::Max,
            duration: Duration::from_secs(5),
            alert_rule: None,
        },
    )
    .unwrap();

    let (tx, rx) = crossbeam::channel::unbounded();
    agg.analyze(&window, &tx);
    drop(tx);

    let metrics: Vec<_> = rx.iter().collect();
    assert_eq!(metrics.len(), 1);
    assert_eq!(payload_of(metrics[0].as_ref()), Payload::Gauge(0.4));
}

#[test]
fn aggregation_rate_limit_suppresses_a_second_call() {
    let agg = Aggregation::new(
        &parent("x"),
        Labels::new(),
        AggregationOpts {
            kind: AggKind::Max,
            duration: Duration::from_secs(5),
            alert_rule: None,
        },
    )
    .unwrap();
    let window = series(&[1.0], Duration::from_millis(100));

    let (tx, rx) = crossbeam::channel::unbounded();
    agg.analyze(&window, &tx);
    agg.analyze(&window, &tx);
    drop(tx);

    assert_eq!(rx.iter().count(), 1);
}

#[test]
fn quantile_targeted_set_fires_its_configured_alert() {
    let q = QuantileAnalyzer::new(
        &parent("latency"),
        Labels::new(),
        vec![
            (0.5, "none".to_string()),
            (0.9, "bigger:0.1:3".to_string()),
            (0.99, "none".to_string()),
        ],
    )
    .unwrap();

    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let window: Vec<DataPair> = (0..1000)
        .map(|_| DataPair::new(next(), SystemTime::now()))
        .collect();

    let (tx, rx) = crossbeam::channel::unbounded();
    StatelessAnalyzer::analyze(&q, &window, &tx);
    drop(tx);

    let metrics: Vec<_> = rx.iter().collect();
    // one summary carrying all three quantile entries, plus the rank-0.9 alert
    assert_eq!(metrics.len(), 2);
    let quantile_count = metrics
        .iter()
        .find_map(|m| match payload_of(m.as_ref()) {
            Payload::Summary { quantiles, .. } => Some(quantiles.len()),
            _ => None,
        })
        .expect("a summary metric was emitted");
    assert_eq!(quantile_count, 3);
}

struct FixedGauge {
    desc: Arc<Desc>,
    value: f64,
}

impl Collector for FixedGauge {
    fn describe(&self, tx: &crossbeam::channel::Sender<Arc<Desc>>) {
        let _ = tx.send(Arc::clone(&self.desc));
    }

    fn collect(&self, tx: &crossbeam::channel::Sender<Box<dyn Metric>>) {
        let _ = tx.send(Box::new(abyss::metric::ConstMetric::new(
            Arc::clone(&self.desc),
            abyss::metric::ValueType::GaugeValue,
            self.value,
        )));
    }
}

#[test]
fn registry_rejects_a_duplicate_descriptor_then_a_duplicate_registration() {
    let registry = Registry::new();
    let labels = &[("a", "1")];
    let a: Arc<dyn Collector> = Arc::new(FixedGauge {
        desc: Desc::new_arc("x", "help", 3, 0, [], labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()).unwrap(),
        value: 1.0,
    });
    let b: Arc<dyn Collector> = Arc::new(FixedGauge {
        desc: Desc::new_arc("x", "help", 3, 0, [], labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()).unwrap(),
        value: 2.0,
    });

    registry.register(Arc::clone(&a)).unwrap();
    let err = registry.register(b).unwrap_err();
    assert!(matches!(err, AbyssError::DuplicateDescriptor(_)));

    let err = registry.register(a).unwrap_err();
    assert!(matches!(err, AbyssError::AlreadyRegistered { .. }));
}
