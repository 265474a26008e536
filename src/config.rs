//! Decodes the per-process YAML configuration document into the typed
//! records the supervisor and pusher factories consume.

use std::time::Duration;

use serde::Deserialize;

use crate::metric::Labels;

/// Mirrors the `desc` block shared by a pusher and every analyzer config.
#[derive(Debug, Clone, Deserialize)]
pub struct DescCfg {
    /// Metric family name.
    pub name: String,
    /// Help text.
    #[serde(default)]
    pub help: String,
    /// Severity level, `0..=3`.
    pub level: u16,
    /// Priority, carried through to emitted metrics.
    #[serde(default)]
    pub priority: u16,
    /// Constant labels.
    #[serde(default, rename = "constLabels")]
    pub const_labels: Labels,
}

/// The numeric encoding of [`crate::metric::ValueType`] used by the `pusher`
/// config block's `valuetype` field.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "u8")]
pub enum ValueTypeCfg {
    /// Counter (wire value 1).
    Counter,
    /// Gauge (wire value 2).
    Gauge,
}

impl TryFrom<u8> for ValueTypeCfg {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Counter),
            2 => Ok(Self::Gauge),
            other => Err(format!("valuetype must be 1 (counter) or 2 (gauge), got {other}")),
        }
    }
}

/// The `pusher` block of one `pushercfg` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PusherCfg {
    /// Descriptor options.
    pub desc: DescCfg,
    /// Whether the pusher emits its own raw samples as `ConstMetric`s
    /// alongside whatever its analyzers produce.
    #[serde(default, rename = "selfcol")]
    pub self_collect: bool,
    /// Counter or gauge.
    #[serde(rename = "valuetype")]
    pub value_type: ValueTypeCfg,
    /// Window size kept for stateless analyzers.
    #[serde(with = "humantime_serde")]
    pub inv: Duration,
    /// Push-function spec, `"<kind>:<field>"`.
    #[serde(rename = "pushFunc")]
    pub push_func: String,
    /// Push period. Must be `100ms..=5s`.
    #[serde(rename = "pfinv", with = "humantime_serde")]
    pub pf_inv: Duration,
}

/// One entry of a `quantile` analyzer's `targets` map: a rank and the alert
/// rule to evaluate against that rank's estimate. Kept as raw strings
/// (rather than deserializing directly into `f64` keys) because YAML maps
/// keyed by float literals don't round-trip cleanly through serde's map
/// deserializer; the rank is parsed explicitly where the config is
/// consumed.
pub type QuantileTargets = std::collections::BTreeMap<String, String>;

/// Options for a `quantile` analyzer entry.
#[derive(Debug, Clone, Deserialize)]
pub struct QuantileCfg {
    /// Descriptor options.
    pub desc: DescCfg,
    /// Rank (as a string, e.g. `"0.9"`) to alert rule.
    pub targets: QuantileTargets,
}

impl QuantileCfg {
    /// Parses `targets`' string keys into `(rank, rule)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AbyssError::Construction`] if a key does not
    /// parse as an `f64`.
    pub fn parsed_targets(&self) -> Result<Vec<(f64, String)>, crate::error::AbyssError> {
        self.targets
            .iter()
            .map(|(rank, rule)| {
                rank.parse::<f64>()
                    .map(|r| (r, rule.clone()))
                    .map_err(|_| {
                        crate::error::AbyssError::Construction(format!(
                            "quantile target rank {rank:?} is not a number"
                        ))
                    })
            })
            .collect()
    }
}

/// Options for an `aggregation` analyzer entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationCfg {
    /// Descriptor options.
    pub desc: DescCfg,
    /// How far back the window extends.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// `"max"` or `"min"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional alert rule evaluated against the aggregated result.
    #[serde(default)]
    pub alert: Option<String>,
}

/// One entry of an analyzer list (`slana`/`sfana`), tagged by `type` with
/// its options nested under `opt` — the direct Rust analogue of the
/// `RawMessage`/type-assertion dance this was distilled from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "opt", rename_all = "lowercase")]
pub enum AnaConfig {
    /// A windowed max/min reduction.
    Aggregation(AggregationCfg),
    /// A targeted-quantile sketch.
    Quantile(QuantileCfg),
}

/// One `pushercfg` list entry: a pusher plus the analyzers attached to it.
#[derive(Debug, Clone, Deserialize)]
pub struct PusherEntry {
    /// The pusher itself.
    pub pusher: PusherCfg,
    /// Stateless analyzers driven by `Analyze(window)`.
    #[serde(default)]
    pub slana: Vec<AnaConfig>,
    /// Stateful analyzers driven by `Observe(sample)`.
    #[serde(default)]
    pub sfana: Vec<AnaConfig>,
}

/// The full per-process configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcConfig {
    /// One entry per pusher this process should run.
    pub pushercfg: Vec<PusherEntry>,
}

impl ProcConfig {
    /// Parses a document from its YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AbyssError::Config`] on malformed YAML or a
    /// schema mismatch.
    pub fn from_yaml(text: &str) -> Result<Self, crate::error::AbyssError> {
        serde_yaml::from_str(text).map_err(crate::error::AbyssError::Config)
    }
}
