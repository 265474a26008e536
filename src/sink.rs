//! Downstream delivery: a pluggable [`Sink`] trait plus a line-protocol
//! renderer for the gathered metric families.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::error::AbyssError;
use crate::metric::{MetricFamily, Payload, WireMetric};

/// Accepts a supervisor tick's gathered, level-bucketed metric families.
pub trait Sink: Send + Sync {
    /// Delivers one tick's worth of gathered families.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails; the supervisor logs it and
    /// continues ticking.
    fn write(&self, buckets: &BTreeMap<u8, Vec<MetricFamily>>) -> Result<(), AbyssError>;
}

fn escape_tag(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
        .replace('=', "\\=")
}

fn ns_since_epoch(ts: SystemTime) -> u128 {
    ts.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Renders one [`WireMetric`] of family `name` as a single line-protocol
/// record: `measurement,tag1=v1,… field1=v1,… <ns-timestamp>`. Each payload
/// kind gets its own field name — `counter`, `gauge`, `event_value`, or for
/// `Summary`, `count`/`sum` plus one `quantile_<rank>` field per entry.
#[must_use]
pub fn render_line(name: &str, metric: &WireMetric) -> String {
    let mut line = name.to_string();
    for (k, v) in &metric.labels {
        line.push(',');
        line.push_str(&escape_tag(k));
        line.push('=');
        line.push_str(&escape_tag(v));
    }
    line.push(' ');

    let (fields, event_ts) = match &metric.payload {
        Payload::Counter(v) => (format!("counter={v}i"), None),
        Payload::Gauge(v) => (format!("gauge={v}"), None),
        Payload::Event { value, ts } => (format!("event_value={value}"), Some(*ts)),
        Payload::Summary {
            count,
            sum,
            quantiles,
        } => {
            let mut parts = vec![format!("count={count}i"), format!("sum={sum}")];
            for (rank, value) in quantiles {
                parts.push(format!("quantile_{rank}={value}"));
            }
            (parts.join(","), None)
        }
    };
    line.push_str(&fields);

    let ts = metric.timestamp.or(event_ts).unwrap_or_else(SystemTime::now);
    line.push(' ');
    line.push_str(&ns_since_epoch(ts).to_string());
    line
}

/// Renders every family in every bucket to line-protocol text, one record
/// per line.
#[must_use]
pub fn render_buckets(buckets: &BTreeMap<u8, Vec<MetricFamily>>) -> String {
    let mut out = String::new();
    for families in buckets.values() {
        for family in families {
            for metric in &family.metrics {
                out.push_str(&render_line(&family.name, metric));
                out.push('\n');
            }
        }
    }
    out
}

/// A [`Sink`] that writes line-protocol text to any `Write` destination
/// (typically stdout or a socket wrapper), serialized behind a mutex since
/// the supervisor may tick while a prior write is still flushing.
pub struct LineProtocolSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LineProtocolSink<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> Sink for LineProtocolSink<W> {
    fn write(&self, buckets: &BTreeMap<u8, Vec<MetricFamily>>) -> Result<(), AbyssError> {
        let text = render_buckets(buckets);
        let mut writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}
