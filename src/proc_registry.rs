use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::analyzer::{
    AggKind, Aggregation, AggregationOpts, QuantileAnalyzer, StatefulAnalyzer, StatelessAnalyzer,
};
use crate::config::{AnaConfig, ProcConfig, PusherEntry, ValueTypeCfg};
use crate::error::{AbyssError, MultiError};
use crate::metric::{Desc, Labels, MetricFamily, ValueType};
use crate::pusher::{Pusher, SelfCollect};
use crate::pushfunc::{self, PushFuncOpts};
use crate::registry::{Collector, Registry};

/// A thin facade over a [`Registry`] scoped to one monitored process: owns
/// the pushers that need a `Start`/`Stop` lifecycle, separately from
/// pull-only collectors that don't.
#[derive(Default)]
pub struct ProcRegistry {
    registry: Registry,
    pushers_by_name: HashMap<String, Arc<Pusher>>,
    pullers_by_name: HashMap<String, Arc<dyn Collector>>,
}

impl ProcRegistry {
    /// Creates an empty process registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pull-only collector under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::Construction`] if `name` is already taken, or
    /// whatever [`Registry::register`] returns otherwise.
    pub fn puller_reg(&mut self, name: &str, collector: Arc<dyn Collector>) -> Result<(), AbyssError> {
        if self.pullers_by_name.contains_key(name) {
            return Err(AbyssError::Construction(format!(
                "puller named {name:?} already exists"
            )));
        }
        self.registry.register(Arc::clone(&collector))?;
        self.pullers_by_name.insert(name.to_string(), collector);
        Ok(())
    }

    /// Unregisters the puller named `name`. A no-op if absent.
    pub fn puller_unreg(&mut self, name: &str) {
        if let Some(c) = self.pullers_by_name.remove(name) {
            self.registry.unregister(&c);
        }
    }

    /// Registers a pusher under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::Construction`] if `name` is already taken, or
    /// whatever [`Registry::register`] returns otherwise.
    pub fn pusher_reg(&mut self, name: &str, pusher: Arc<Pusher>) -> Result<(), AbyssError> {
        if self.pushers_by_name.contains_key(name) {
            return Err(AbyssError::Construction(format!(
                "pusher named {name:?} already exists"
            )));
        }
        self.registry.register(Arc::clone(&pusher) as Arc<dyn Collector>)?;
        self.pushers_by_name.insert(name.to_string(), pusher);
        Ok(())
    }

    /// Stops and unregisters the pusher named `name`. A no-op if absent.
    pub fn pusher_unreg(&mut self, name: &str) {
        if let Some(p) = self.pushers_by_name.remove(name) {
            p.stop();
            self.registry.unregister(&(Arc::clone(&p) as Arc<dyn Collector>));
        }
    }

    /// Starts every registered pusher.
    pub fn start(&self) {
        for pusher in self.pushers_by_name.values() {
            pusher.start();
        }
    }

    /// Stops every registered pusher.
    pub fn stop(&self) {
        for pusher in self.pushers_by_name.values() {
            pusher.stop();
        }
    }

    /// Gathers the underlying registry.
    pub fn gather(&self) -> (BTreeMap<u8, Vec<MetricFamily>>, MultiError) {
        self.registry.gather()
    }

    /// Builds a process registry from a decoded configuration document,
    /// registering one started pusher per `pushercfg` entry.
    ///
    /// # Errors
    ///
    /// Returns [`AbyssError::Construction`] if an analyzer or push-function
    /// spec fails to build, or whatever [`Registry::register`] returns on a
    /// name collision.
    pub fn from_config(
        pid: u32,
        config: &ProcConfig,
        push_opts: &PushFuncOpts,
    ) -> Result<Self, AbyssError> {
        let mut pr = Self::new();
        for entry in &config.pushercfg {
            let (name, pusher) = build_pusher(pid, entry, push_opts)?;
            pr.pusher_reg(&name, pusher)?;
        }
        Ok(pr)
    }
}

/// The pusher naming convention: `"Pid_<pid>_<field>"`.
#[must_use]
pub fn pusher_name(pid: u32, push_fn_field: &str) -> String {
    format!("Pid_{pid}_{push_fn_field}")
}

fn with_pid_label(labels: &Labels, pid: u32) -> Labels {
    let mut labels = labels.clone();
    labels.insert("PID".to_string(), pid.to_string());
    labels
}

fn build_desc(pid: u32, d: &crate::config::DescCfg) -> Result<Arc<Desc>, AbyssError> {
    Desc::new_arc(
        d.name.clone(),
        d.help.clone(),
        d.level,
        d.priority,
        [],
        with_pid_label(&d.const_labels, pid),
    )
}

fn build_stateless(pid: u32, cfg: &AnaConfig) -> Result<Arc<dyn StatelessAnalyzer>, AbyssError> {
    match cfg {
        AnaConfig::Aggregation(a) => {
            let parent = build_desc(pid, &a.desc)?;
            let kind = match a.kind.as_str() {
                "max" => AggKind::Max,
                "min" => AggKind::Min,
                other => {
                    return Err(AbyssError::Construction(format!(
                        "aggregation {other:?} does not exist"
                    )))
                }
            };
            let agg = Aggregation::new(
                &parent,
                Labels::new(),
                AggregationOpts {
                    kind,
                    duration: a.duration,
                    alert_rule: a.alert.clone(),
                },
            )?;
            Ok(Arc::new(agg))
        }
        AnaConfig::Quantile(q) => {
            let parent = build_desc(pid, &q.desc)?;
            let ranks = q.parsed_targets()?;
            let qa = QuantileAnalyzer::new(&parent, Labels::new(), ranks)?;
            Ok(Arc::new(qa))
        }
    }
}

fn build_stateful(pid: u32, cfg: &AnaConfig) -> Result<Arc<dyn StatefulAnalyzer>, AbyssError> {
    match cfg {
        AnaConfig::Quantile(q) => {
            let parent = build_desc(pid, &q.desc)?;
            let ranks = q.parsed_targets()?;
            let qa = QuantileAnalyzer::new(&parent, Labels::new(), ranks)?;
            Ok(Arc::new(qa))
        }
        AnaConfig::Aggregation(_) => Err(AbyssError::Construction(
            "aggregation cannot be used as a stateful analyzer".to_string(),
        )),
    }
}

fn build_pusher(
    pid: u32,
    entry: &PusherEntry,
    push_opts: &PushFuncOpts,
) -> Result<(String, Arc<Pusher>), AbyssError> {
    let cfg = &entry.pusher;
    let desc = build_desc(pid, &cfg.desc)?;
    let value_type = match cfg.value_type {
        ValueTypeCfg::Counter => ValueType::CounterValue,
        ValueTypeCfg::Gauge => ValueType::GaugeValue,
    };

    let stateless = entry
        .slana
        .iter()
        .map(|a| build_stateless(pid, a))
        .collect::<Result<Vec<_>, _>>()?;
    let stateful = entry
        .sfana
        .iter()
        .map(|a| build_stateful(pid, a))
        .collect::<Result<Vec<_>, _>>()?;

    let field = cfg
        .push_func
        .splitn(2, ':')
        .nth(1)
        .unwrap_or(&cfg.push_func)
        .to_string();
    let push_fn = pushfunc::from_spec(pid, &cfg.push_func, cfg.pf_inv, push_opts)?;

    let self_collect = cfg.self_collect.then(|| SelfCollect {
        desc: Arc::clone(&desc),
        value_type,
    });

    let pusher = Arc::new(Pusher::new(
        Arc::from(push_fn),
        stateful,
        stateless,
        cfg.inv,
        self_collect,
    ));
    Ok((pusher_name(pid, &field), pusher))
}
