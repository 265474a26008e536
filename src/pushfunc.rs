//! Built-in [`crate::pusher::PushFn`] implementations and push-function spec
//! parsing (`"<kind>:<field>"`).

use std::fs;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Receiver, Sender};
use tracing::warn;

use crate::data::DataPair;
use crate::error::AbyssError;
use crate::pusher::PushFn;

/// Extra options a push function may need beyond `pid`/`field`.
#[derive(Debug, Clone, Default)]
pub struct PushFuncOpts {
    /// Path to the target binary, required by `UfuncCnt`.
    pub target_path: Option<String>,
}

/// Builds the push function named by `spec` (`"<kind>:<field>"`), ticking at
/// `period`.
///
/// # Errors
///
/// Returns [`AbyssError::Construction`] if `spec` doesn't match a known
/// kind/field combination, or if a required option is missing (e.g.
/// `UfuncCnt` without `opts.target_path`).
pub fn from_spec(
    pid: u32,
    spec: &str,
    period: Duration,
    opts: &PushFuncOpts,
) -> Result<Box<dyn PushFn>, AbyssError> {
    if !(Duration::from_millis(100)..=Duration::from_secs(5)).contains(&period) {
        return Err(AbyssError::Construction(format!(
            "push period must be 100ms..=5s, got {period:?}"
        )));
    }

    let fields: Vec<&str> = spec.splitn(2, ':').collect();
    match fields.as_slice() {
        ["procinfo", field] => {
            if !matches!(*field, "cpuUsage" | "memUsage") {
                return Err(AbyssError::Construction(format!(
                    "procinfo does not support field {field:?}"
                )));
            }
            Ok(Box::new(ProcInfo {
                pid,
                field: (*field).to_string(),
                period,
            }))
        }
        ["UfuncCnt", symbol] => {
            let target_path = opts.target_path.clone().ok_or_else(|| {
                AbyssError::Construction("UfuncCnt requires a target_path option".to_string())
            })?;
            Ok(Box::new(UfuncCnt {
                pid,
                target_path,
                symbol: (*symbol).to_string(),
                period,
            }))
        }
        _ => Err(AbyssError::Construction(format!(
            "push function spec {spec:?} does not match \"<kind>:<field>\""
        ))),
    }
}

/// Reads `/proc/<pid>/stat`'s utime+stime field as a coarse CPU-usage proxy,
/// or a memory-usage percentage from `/proc/<pid>/status`' `VmRSS` line.
/// Ticks every `period`; emits [`AbyssError::TransientProducer`]-worthy
/// conditions to the log rather than the channel — a push function has no
/// way to surface an error except skipping the tick.
#[derive(Debug)]
struct ProcInfo {
    pid: u32,
    field: String,
    period: Duration,
}

impl ProcInfo {
    fn read(&self) -> Result<f64, AbyssError> {
        match self.field.as_str() {
            "cpuUsage" => read_cpu_ticks(self.pid),
            "memUsage" => read_mem_percent(self.pid),
            other => Err(AbyssError::Construction(format!(
                "unsupported procinfo field {other:?}"
            ))),
        }
    }
}

fn read_cpu_ticks(pid: u32) -> Result<f64, AbyssError> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat"))
        .map_err(|_| AbyssError::TransientProducer(format!("pid {pid} does not exist")))?;
    // Fields are space-separated; the comm field (index 1) may itself contain
    // spaces inside parens, so split on the closing paren first.
    let after_comm = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .unwrap_or(&stat);
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // utime is field 14 overall, stime is field 15; after stripping
    // "pid (comm) state", that's indices 11 and 12 of `fields`.
    let utime: f64 = fields.get(11).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let stime: f64 = fields.get(12).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    Ok(utime + stime)
}

fn read_mem_percent(pid: u32) -> Result<f64, AbyssError> {
    let status = fs::read_to_string(format!("/proc/{pid}/status"))
        .map_err(|_| AbyssError::TransientProducer(format!("pid {pid} does not exist")))?;
    let total = fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| parse_meminfo_kb(&s, "MemTotal:"))
        .unwrap_or(1.0);
    let rss = parse_meminfo_kb(&status, "VmRSS:").unwrap_or(0.0);
    Ok(100.0 * rss / total)
}

fn parse_meminfo_kb(text: &str, label: &str) -> Option<f64> {
    text.lines()
        .find(|l| l.starts_with(label))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|n| n.parse().ok())
}

impl PushFn for ProcInfo {
    fn push(&self, tx: Sender<DataPair>, cancelled: Receiver<()>) {
        loop {
            crossbeam::select! {
                recv(cancelled) -> _ => break,
                default(self.period) => {}
            }
            match self.read() {
                Ok(value) => {
                    if tx.send(DataPair::new(value, SystemTime::now())).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(pid = self.pid, error = %e, "procinfo push skipped a tick"),
            }
        }
    }
}

/// Placeholder push function standing in for uprobe-based function-call
/// counting. Real uprobe attachment is out of scope; this synthesizes a
/// monotonically increasing counter so pushers attached to a `UfuncCnt`
/// pusher still exercise the rest of the pipeline end to end.
#[derive(Debug)]
struct UfuncCnt {
    pid: u32,
    target_path: String,
    symbol: String,
    period: Duration,
}

impl PushFn for UfuncCnt {
    fn push(&self, tx: Sender<DataPair>, cancelled: Receiver<()>) {
        // TODO: attach a uprobe to self.symbol in self.target_path and count
        // real invocations instead of synthesizing one.
        tracing::debug!(pid = self.pid, target = %self.target_path, symbol = %self.symbol, "starting UfuncCnt placeholder push loop");
        let mut count: u64 = 0;
        let mut step_state: u32 = self.pid.wrapping_mul(2_654_435_761).wrapping_add(1);
        loop {
            crossbeam::select! {
                recv(cancelled) -> _ => break,
                default(self.period) => {}
            }
            // xorshift32, seeded from pid/symbol — deterministic per process,
            // avoids depending on a random-number crate in non-test code.
            step_state ^= step_state << 13;
            step_state ^= step_state >> 17;
            step_state ^= step_state << 5;
            count += u64::from(step_state % 5);
            if tx
                .send(DataPair::new(count as f64, SystemTime::now()))
                .is_err()
            {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_kind() {
        let err = from_spec(1, "bogus:field", Duration::from_millis(200), &PushFuncOpts::default())
            .unwrap_err();
        assert!(matches!(err, AbyssError::Construction(_)));
    }

    #[test]
    fn rejects_unsupported_procinfo_field() {
        let err = from_spec(
            1,
            "procinfo:diskUsage",
            Duration::from_millis(200),
            &PushFuncOpts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AbyssError::Construction(_)));
    }

    #[test]
    fn rejects_period_out_of_range() {
        assert!(from_spec(1, "procinfo:cpuUsage", Duration::from_millis(99), &PushFuncOpts::default()).is_err());
        assert!(from_spec(
            1,
            "procinfo:cpuUsage",
            Duration::from_millis(5001),
            &PushFuncOpts::default()
        )
        .is_err());
    }

    #[test]
    fn ufunc_cnt_requires_target_path() {
        let err = from_spec(
            1,
            "UfuncCnt:my_symbol",
            Duration::from_millis(200),
            &PushFuncOpts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AbyssError::Construction(_)));
    }

    #[test]
    fn ufunc_cnt_builds_with_target_path() {
        let opts = PushFuncOpts {
            target_path: Some("/bin/true".to_string()),
        };
        assert!(from_spec(1, "UfuncCnt:my_symbol", Duration::from_millis(200), &opts).is_ok());
    }

    #[test]
    fn procinfo_reads_self_pid_cpu_ticks() {
        let pid = std::process::id();
        let pf = ProcInfo {
            pid,
            field: "cpuUsage".to_string(),
            period: Duration::from_millis(100),
        };
        assert!(pf.read().unwrap() >= 0.0);
    }
}
