use std::time::SystemTime;

/// A single timestamped numeric sample, as produced by a push function and
/// consumed by a [`crate::pusher::Pusher`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPair {
    /// The observed value.
    pub value: f64,
    /// When the value was observed.
    pub ts: SystemTime,
}

impl DataPair {
    /// Builds a new sample.
    #[must_use]
    pub fn new(value: f64, ts: SystemTime) -> Self {
        Self { value, ts }
    }
}
