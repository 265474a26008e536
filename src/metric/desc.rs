use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use twox_hash::XxHash64;

use crate::error::AbyssError;

/// Importance of a metric, used to bucket gathered families for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MetricLevel {
    /// Irrecoverable condition.
    Fault = 0,
    /// Recoverable error.
    Error = 1,
    /// Routine event worth recording.
    Log = 2,
    /// Informational.
    Info = 3,
}

impl MetricLevel {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::Fault),
            1 => Some(Self::Error),
            2 => Some(Self::Log),
            3 => Some(Self::Info),
            _ => None,
        }
    }
}

/// A const-label (or variable-label name) map. Keys are unique by
/// construction (it's a map).
pub type Labels = BTreeMap<String, String>;

/// Immutable identity of a metric family: name, help text, level, priority,
/// constant label set, and the (ordered) names of variable labels.
///
/// A `Desc` is built once via [`Desc::new`] and shared thereafter via `Arc`;
/// every `Metric` carries a reference to the `Desc` it was built from.
#[derive(Debug)]
pub struct Desc {
    name: String,
    help: String,
    level: MetricLevel,
    priority: u16,
    const_label_pairs: Vec<(String, String)>,
    variable_label_names: Vec<String>,
    id: u64,
}

impl Desc {
    /// Builds a new descriptor.
    ///
    /// Fails when `level` is out of range (callers should pass one of
    /// `0..=3`) or when a label name appears in both `const_labels` and
    /// `variable_labels`. The descriptor's `id` is a 64-bit non-cryptographic
    /// hash of `name` followed by the const label values, in label-name
    /// sorted order — this makes `id` independent of insertion order and
    /// deterministic for any two descriptors with equal `(name, const_labels)`.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        level: u16,
        priority: u16,
        variable_labels: impl IntoIterator<Item = String>,
        const_labels: Labels,
    ) -> Result<Self, AbyssError> {
        let name = name.into();
        let help = help.into();
        let level = MetricLevel::from_u16(level)
            .ok_or_else(|| AbyssError::Construction(format!("illegal metric level {level}")))?;

        let variable_label_names: Vec<String> = variable_labels.into_iter().collect();

        for vname in &variable_label_names {
            if const_labels.contains_key(vname) {
                return Err(AbyssError::Construction(format!(
                    "duplicate label name {vname:?} in constant and variable labels for metric {name:?}"
                )));
            }
        }

        let mut hasher = XxHash64::with_seed(0);
        hasher.write(name.as_bytes());
        for (_, v) in &const_labels {
            hasher.write(v.as_bytes());
        }
        let id = hasher.finish();

        let const_label_pairs = const_labels.into_iter().collect();

        Ok(Self {
            name,
            help,
            level,
            priority,
            const_label_pairs,
            variable_label_names,
            id,
        })
    }

    /// Convenience constructor returning an `Arc<Desc>` directly, the shape
    /// every `Metric`/`Collector` implementation in this crate stores.
    pub fn new_arc(
        name: impl Into<String>,
        help: impl Into<String>,
        level: u16,
        priority: u16,
        variable_labels: impl IntoIterator<Item = String>,
        const_labels: Labels,
    ) -> Result<Arc<Self>, AbyssError> {
        Self::new(name, help, level, priority, variable_labels, const_labels).map(Arc::new)
    }

    /// The metric family name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Severity level.
    #[must_use]
    pub fn level(&self) -> MetricLevel {
        self.level
    }

    /// Priority, carried through to emitted metrics unchanged.
    #[must_use]
    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// Const label pairs, in the order captured at construction.
    #[must_use]
    pub fn const_label_pairs(&self) -> &[(String, String)] {
        &self.const_label_pairs
    }

    /// Names of variable labels this descriptor declares.
    #[must_use]
    pub fn variable_label_names(&self) -> &[String] {
        &self.variable_label_names
    }

    /// The structural id: deterministic for equal `(name, const_labels)`
    /// regardless of insertion order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Builds a descriptor that augments `self`'s const labels with
    /// `extra`, reusing `self`'s name/help/level/priority. Used by analyzers
    /// and alerts to derive a descriptor from a parent's options plus
    /// analyzer- or alert-specific labels.
    pub fn with_extra_labels(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        extra: Labels,
    ) -> Result<Self, AbyssError> {
        let mut labels: Labels = self.const_label_pairs.iter().cloned().collect();
        for (k, v) in extra {
            labels.insert(k, v);
        }
        Self::new(name, help, self.level as u16, self.priority, [], labels)
    }
}

impl fmt::Display for Desc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .const_label_pairs
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect();
        write!(
            f,
            "Desc{{name: {:?}, help: {:?}, constLabels: {{{}}}, variableLabels: {:?}}}",
            self.name,
            self.help,
            pairs.join(","),
            self.variable_label_names,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn id_is_order_independent() {
        let a = Desc::new(
            "x",
            "help",
            3,
            0,
            [],
            labels(&[("a", "1"), ("b", "2")]),
        )
        .unwrap();
        let b = Desc::new(
            "x",
            "help",
            3,
            0,
            [],
            labels(&[("b", "2"), ("a", "1")]),
        )
        .unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_differs_on_value_change() {
        let a = Desc::new("x", "h", 3, 0, [], labels(&[("a", "1")])).unwrap();
        let b = Desc::new("x", "h", 3, 0, [], labels(&[("a", "2")])).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rejects_out_of_range_level() {
        assert!(Desc::new("x", "h", 4, 0, [], Labels::new()).is_err());
    }

    #[test]
    fn rejects_label_name_collision() {
        let err = Desc::new(
            "x",
            "h",
            3,
            0,
            ["a".to_string()],
            labels(&[("a", "1")]),
        )
        .unwrap_err();
        assert!(matches!(err, AbyssError::Construction(_)));
    }

    #[test]
    fn display_is_deterministic() {
        let d = Desc::new("x", "h", 3, 0, ["v".to_string()], labels(&[("a", "1")])).unwrap();
        assert_eq!(
            d.to_string(),
            "Desc{name: \"x\", help: \"h\", constLabels: {a=\"1\"}, variableLabels: [\"v\"]}"
        );
    }
}
