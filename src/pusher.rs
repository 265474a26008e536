use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::analyzer::{StatefulAnalyzer, StatelessAnalyzer};
use crate::data::DataPair;
use crate::metric::{ConstMetric, Desc, Metric, TimeStampMetric, ValueType};
use crate::registry::Collector;

const RECEIVER_CAP: usize = 10;

/// Produces samples for a [`Pusher`] to consume. `push` owns the sample
/// channel: it must stop sending and drop `tx` once `cancelled` closes, and
/// is the only party ever allowed to close it.
pub trait PushFn: Send + Sync + std::fmt::Debug {
    /// Runs until `cancelled` closes, sending samples on `tx`. Must drop
    /// `tx` before returning.
    fn push(&self, tx: Sender<DataPair>, cancelled: Receiver<()>);
}

/// If set, `Collect` also emits each sample received since the last cycle as
/// a raw [`ConstMetric`] under the pusher's own descriptor.
pub struct SelfCollect {
    /// The pusher's own descriptor.
    pub desc: Arc<Desc>,
    /// Counter or gauge, as configured.
    pub value_type: ValueType,
}

struct RunState {
    cancel_tx: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

/// Drives a [`PushFn`] on a background thread, feeding every sample to its
/// stateful analyzers as it arrives and handing its stateless analyzers a
/// trailing `time_range` window once per `Collect` cycle.
pub struct Pusher {
    pf: Arc<dyn PushFn>,
    stateful: Vec<Arc<dyn StatefulAnalyzer>>,
    stateless: Vec<Arc<dyn StatelessAnalyzer>>,
    time_range: Duration,
    self_collect: Option<SelfCollect>,
    buf: Mutex<Vec<DataPair>>,
    window: ArcSwap<Vec<DataPair>>,
    run: Mutex<RunState>,
    running: AtomicBool,
}

impl Pusher {
    /// Builds a pusher. `time_range` bounds how far back `window` retains
    /// samples for stateless analyzers; it has no upper limit enforced here
    /// (the 10-minute cap belongs to aggregation analyzers, not the pusher
    /// itself).
    #[must_use]
    pub fn new(
        pf: Arc<dyn PushFn>,
        stateful: Vec<Arc<dyn StatefulAnalyzer>>,
        stateless: Vec<Arc<dyn StatelessAnalyzer>>,
        time_range: Duration,
        self_collect: Option<SelfCollect>,
    ) -> Self {
        Self {
            pf,
            stateful,
            stateless,
            time_range,
            self_collect,
            buf: Mutex::new(Vec::new()),
            window: ArcSwap::from_pointee(Vec::new()),
            run: Mutex::new(RunState {
                cancel_tx: None,
                handles: Vec::new(),
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Starts the background push thread and a receive thread that folds
    /// incoming samples into `buf` and the stateful analyzers. A no-op if
    /// already running.
    pub fn start(self: &Arc<Self>) {
        let mut run = self.run.lock();
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let (sample_tx, sample_rx) = bounded::<DataPair>(RECEIVER_CAP);

        let pf = Arc::clone(&self.pf);
        let push_handle = thread::spawn(move || pf.push(sample_tx, cancel_rx));

        let this = Arc::clone(self);
        let receive_handle = thread::spawn(move || this.receive(sample_rx));

        run.cancel_tx = Some(cancel_tx);
        run.handles = vec![push_handle, receive_handle];
    }

    fn receive(&self, sample_rx: Receiver<DataPair>) {
        for pair in sample_rx.iter() {
            for a in &self.stateful {
                a.observe(&pair);
            }
            self.buf.lock().push(pair);
        }
    }

    /// Signals the push function to stop and joins both background threads.
    /// Does not touch the sample channel itself — closing it is `PushFn`'s
    /// responsibility, so a push function that never observes cancellation
    /// will hang `stop` forever by design.
    pub fn stop(&self) {
        let mut run = self.run.lock();
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("stopping pusher");
        run.cancel_tx = None;
        for h in run.handles.drain(..) {
            let _ = h.join();
        }
    }

    /// Swaps `buf` for an empty one, returning what it held.
    fn take_buf(&self) -> Vec<DataPair> {
        std::mem::take(&mut *self.buf.lock())
    }

    /// Drops every prefix element of `window` whose `ts` is at or before
    /// `now - time_range`, appends `tmp`, stores the result, and returns it.
    fn extend_window(&self, tmp: &[DataPair]) -> Arc<Vec<DataPair>> {
        let cutoff = SystemTime::now()
            .checked_sub(self.time_range)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let current = self.window.load();
        let start = current.partition_point(|d| d.ts <= cutoff);
        let mut next = current[start..].to_vec();
        next.extend_from_slice(tmp);
        let next = Arc::new(next);
        self.window.store(Arc::clone(&next));
        next
    }
}

impl Collector for Pusher {
    fn describe(&self, tx: &Sender<Arc<Desc>>) {
        for a in &self.stateful {
            a.describe(tx);
        }
        for a in &self.stateless {
            a.describe(tx);
        }
        if let Some(sc) = &self.self_collect {
            let _ = tx.send(Arc::clone(&sc.desc));
        }
    }

    fn collect(&self, tx: &Sender<Box<dyn Metric>>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let tmp = self.take_buf();
        let window = self.extend_window(&tmp);

        thread::scope(|scope| {
            for a in &self.stateful {
                let tx = tx.clone();
                scope.spawn(move || a.collect(&tx));
            }
            for a in &self.stateless {
                let tx = tx.clone();
                let window = window.as_slice();
                scope.spawn(move || a.analyze(window, &tx));
            }
        });

        if let Some(sc) = &self.self_collect {
            for pair in &tmp {
                let metric = TimeStampMetric::new(
                    pair.ts,
                    ConstMetric::new(Arc::clone(&sc.desc), sc.value_type, pair.value),
                );
                let _ = tx.send(Box::new(metric));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Desc, Labels, Payload};

    #[derive(Debug)]
    struct CountingPush {
        values: Vec<f64>,
    }

    impl PushFn for CountingPush {
        fn push(&self, tx: Sender<DataPair>, cancelled: Receiver<()>) {
            for v in &self.values {
                if cancelled.try_recv().is_ok() {
                    break;
                }
                let _ = tx.send(DataPair::new(*v, SystemTime::now()));
            }
            loop {
                crossbeam::select! {
                    recv(cancelled) -> _ => break,
                    default(Duration::from_millis(10)) => {}
                }
            }
        }
    }

    struct CountingStateful {
        desc: Arc<Desc>,
        count: std::sync::atomic::AtomicU64,
    }

    impl StatefulAnalyzer for CountingStateful {
        fn describe(&self, tx: &Sender<Arc<Desc>>) {
            let _ = tx.send(Arc::clone(&self.desc));
        }
        fn observe(&self, _pair: &DataPair) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
        fn collect(&self, tx: &Sender<Box<dyn Metric>>) {
            let n = self.count.load(Ordering::SeqCst);
            let _ = tx.send(Box::new(ConstMetric::new(
                Arc::clone(&self.desc),
                ValueType::CounterValue,
                n as f64,
            )));
        }
    }

    #[test]
    fn start_stop_is_idempotent() {
        let pusher = Arc::new(Pusher::new(
            Arc::new(CountingPush { values: vec![] }),
            vec![],
            vec![],
            Duration::from_secs(60),
            None,
        ));
        pusher.start();
        pusher.start();
        pusher.stop();
        pusher.stop();
    }

    #[test]
    fn stateful_analyzer_observes_every_pushed_sample() {
        let desc = Desc::new_arc("x", "h", 3, 0, [], Labels::new()).unwrap();
        let stateful = Arc::new(CountingStateful {
            desc,
            count: std::sync::atomic::AtomicU64::new(0),
        });
        let pusher = Arc::new(Pusher::new(
            Arc::new(CountingPush {
                values: vec![1.0, 2.0, 3.0],
            }),
            vec![stateful.clone()],
            vec![],
            Duration::from_secs(60),
            None,
        ));
        pusher.start();
        std::thread::sleep(Duration::from_millis(50));
        pusher.stop();
        assert_eq!(stateful.count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn self_collect_emits_one_const_metric_per_sample() {
        let desc = Desc::new_arc("raw", "h", 3, 0, [], Labels::new()).unwrap();
        let pusher = Arc::new(Pusher::new(
            Arc::new(CountingPush {
                values: vec![1.0, 2.0],
            }),
            vec![],
            vec![],
            Duration::from_secs(60),
            Some(SelfCollect {
                desc,
                value_type: ValueType::GaugeValue,
            }),
        ));
        pusher.start();
        std::thread::sleep(Duration::from_millis(50));

        let (tx, rx) = bounded::<Box<dyn Metric>>(16);
        pusher.collect(&tx);
        drop(tx);
        pusher.stop();

        let metrics: Vec<_> = rx.iter().collect();
        assert_eq!(metrics.len(), 2);
        for m in &metrics {
            assert!(matches!(m.write().unwrap().payload, Payload::Gauge(_)));
        }
    }

    #[test]
    fn describe_emits_own_desc_only_when_self_collecting() {
        let desc = Desc::new_arc("raw", "h", 3, 0, [], Labels::new()).unwrap();
        let without = Pusher::new(
            Arc::new(CountingPush { values: vec![] }),
            vec![],
            vec![],
            Duration::from_secs(60),
            None,
        );
        let (tx, rx) = bounded::<Arc<Desc>>(4);
        without.describe(&tx);
        drop(tx);
        assert_eq!(rx.iter().count(), 0);

        let with = Pusher::new(
            Arc::new(CountingPush { values: vec![] }),
            vec![],
            vec![],
            Duration::from_secs(60),
            Some(SelfCollect {
                desc,
                value_type: ValueType::GaugeValue,
            }),
        );
        let (tx, rx) = bounded::<Arc<Desc>>(4);
        with.describe(&tx);
        drop(tx);
        assert_eq!(rx.iter().count(), 1);
    }
}
