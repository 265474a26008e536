use std::sync::Arc;
use std::time::SystemTime;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::data::DataPair;
use crate::error::AbyssError;
use crate::metric::{Desc, Labels, Metric, Payload, WireMetric};

/// Comparison a value must satisfy for an [`Alert`] to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOp {
    /// Never fires.
    None,
    /// Fires when the observed value is strictly greater than the threshold.
    Bigger,
    /// Fires when the observed value is strictly smaller than the threshold.
    Smaller,
}

impl AlertOp {
    fn parse(s: &str) -> Result<Self, AbyssError> {
        match s {
            "none" => Ok(Self::None),
            "bigger" => Ok(Self::Bigger),
            "smaller" => Ok(Self::Smaller),
            other => Err(AbyssError::Construction(format!(
                "unsupported alert op {other:?}"
            ))),
        }
    }
}

#[derive(Debug)]
struct AlertState {
    value: f64,
    ts: SystemTime,
}

/// A `Metric` of type `Event` that only fires once the metric it watches
/// breaks a threshold rule. Built from a rule string of the form
/// `"<op>:<threshold>:<level>"`.
#[derive(Debug)]
pub struct Alert {
    desc: Arc<Desc>,
    op: AlertOp,
    threshold: f64,
    state: Mutex<AlertState>,
}

impl Alert {
    /// Parses `rule` and builds an `Alert` sharing `parent`'s const labels
    /// (plus `extra` and a `rules` label carrying the raw rule string).
    ///
    /// Returns `Ok(None)` for the sentinel rules `"none"`/`""`, matching
    /// `NewAlertFromStr`'s "no alert configured" shorthand.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::Construction`] if `rule` isn't exactly three
    /// colon-separated fields, if the op or level fields don't parse, or if
    /// descriptor construction fails (including the known case of a level-4
    /// rule, which `Desc::new` always rejects since it only accepts `0..=3`).
    pub fn from_rule(
        parent: &Desc,
        extra: Labels,
        rule: &str,
    ) -> Result<Option<Self>, AbyssError> {
        if rule == "none" || rule.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = rule.split(':').collect();
        if fields.len() != 3 {
            return Err(AbyssError::Construction(format!(
                "alert rule must have 3 fields, got {}",
                fields.len()
            )));
        }

        let op = AlertOp::parse(fields[0])?;
        let threshold: f64 = fields[1]
            .parse()
            .map_err(|_| AbyssError::Construction(format!("bad alert threshold {:?}", fields[1])))?;
        let level: u16 = fields[2]
            .parse()
            .map_err(|_| AbyssError::Construction(format!("bad alert level {:?}", fields[2])))?;

        let mut labels: Labels = parent.const_label_pairs().iter().cloned().collect();
        for (k, v) in extra {
            labels.insert(k, v);
        }
        labels.insert("rules".to_string(), rule.to_string());

        let name = format!("{}(alert)", parent.name());
        let help = format!("Alert of metric {}.", parent.name());
        let desc = Desc::new(name, help, level, parent.priority(), [], labels)?;

        Ok(Some(Self {
            desc: Arc::new(desc),
            op,
            threshold,
            state: Mutex::new(AlertState {
                value: 0.0,
                ts: SystemTime::UNIX_EPOCH,
            }),
        }))
    }

    /// Records `value`/`ts` as the alert's current state and reports whether
    /// the rule fires for this observation.
    pub fn compare(&self, value: f64, ts: SystemTime) -> bool {
        let mut state = self.state.lock();
        state.value = value;
        state.ts = ts;
        match self.op {
            AlertOp::Bigger => value > self.threshold,
            AlertOp::Smaller => value < self.threshold,
            AlertOp::None => false,
        }
    }

    /// Sends this alert on `tx` boxed as `Box<dyn Metric>` (callers typically
    /// wrap it in an `Arc` first so it can also be retained for later
    /// comparisons).
    pub fn emit(self: &Arc<Self>, tx: &Sender<Box<dyn Metric>>) {
        let _ = tx.send(Box::new(Arc::clone(self)) as Box<dyn Metric>);
    }
}

impl Metric for Alert {
    fn desc(&self) -> &Arc<Desc> {
        &self.desc
    }

    fn write(&self) -> Result<WireMetric, AbyssError> {
        let state = self.state.lock();
        let mut labels: Vec<(String, String)> = self.desc.const_label_pairs().to_vec();
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(WireMetric {
            labels,
            timestamp: None,
            payload: Payload::Event {
                value: state.value,
                ts: state.ts,
            },
            priority: self.desc.priority(),
        })
    }
}
