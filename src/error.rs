use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::registry::Collector;

/// Errors that can occur while constructing, registering, or operating the
/// metric collection and analysis pipeline.
#[derive(Error)]
pub enum AbyssError {
    /// A descriptor, alert rule, or analyzer configuration failed validation
    /// at construction time. Never retried.
    #[error("construction error: {0}")]
    Construction(String),

    /// A collector equal to one already registered (same descriptor set)
    /// was registered a second time. Carries both collectors so the caller
    /// can swap the old for the new if that's what it wanted.
    #[error("duplicate collector registration (collector id {collector_id})")]
    AlreadyRegistered {
        /// The collector id (XOR of its descriptor ids) that collided.
        collector_id: u64,
        /// The collector already held by the registry.
        existing: Arc<dyn Collector>,
        /// The collector that was rejected.
        new: Arc<dyn Collector>,
    },

    /// Two distinct collectors reported overlapping descriptor ids.
    #[error("descriptor {0:?} already registered by a different collector")]
    DuplicateDescriptor(String),

    /// Accumulated per-metric errors during a `Gather` call. Never aborts
    /// collection; callers still receive whatever metrics were gathered.
    #[error(transparent)]
    Collection(#[from] MultiError),

    /// The per-process configuration document could not be parsed or
    /// decoded.
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A push function could not produce a sample this tick (e.g. the
    /// monitored pid no longer exists).
    #[error("transient producer error: {0}")]
    TransientProducer(String),

    /// An I/O error from the standard library.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// `Arc<dyn Collector>` carries no `Debug` impl, so `AbyssError` can't derive
// it; every variant already has a `Display` message, so reuse that.
impl fmt::Debug for AbyssError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// A collection of errors accumulated while gathering metrics from many
/// collectors. A non-empty `MultiError` never implies that gathering
/// produced no usable output — `Registry::gather` always returns whatever
/// metric families it could assemble alongside this.
#[derive(Debug, Default)]
pub struct MultiError(pub Vec<AbyssError>);

impl MultiError {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an error if present; a no-op for `Ok`.
    pub fn push(&mut self, err: AbyssError) {
        self.0.push(err);
    }

    /// True if no errors were accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Result type used throughout the crate.
pub type AbyssResult<T> = Result<T, AbyssError>;
