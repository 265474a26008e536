//! Owns one [`ProcRegistry`] per monitored process, reacting to spawn/exit
//! events and a gather ticker on a single serial loop.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{tick, Receiver};
use tracing::{error, info, warn};

use crate::bpf::{ProcExit, ProcSpawn};
use crate::config::ProcConfig;
use crate::metric::MetricFamily;
use crate::proc_registry::ProcRegistry;
use crate::pushfunc::PushFuncOpts;
use crate::sink::Sink;

/// Everything the supervisor loop needs to run: the event sources, the
/// gather interval, and where gathered metrics go.
pub struct Supervisor {
    spawn_rx: Receiver<ProcSpawn>,
    exit_rx: Receiver<ProcExit>,
    cancel_rx: Receiver<()>,
    gather_interval: Duration,
    push_opts: PushFuncOpts,
    sink: Arc<dyn Sink>,
}

impl Supervisor {
    /// Builds a supervisor. `gather_interval` drives the tick that calls
    /// `Gather` on every registered process and forwards the merged result
    /// to `sink`.
    #[must_use]
    pub fn new(
        spawn_rx: Receiver<ProcSpawn>,
        exit_rx: Receiver<ProcExit>,
        cancel_rx: Receiver<()>,
        gather_interval: Duration,
        push_opts: PushFuncOpts,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            spawn_rx,
            exit_rx,
            cancel_rx,
            gather_interval,
            push_opts,
            sink,
        }
    }

    /// Runs the serial supervisor loop until `cancel_rx` fires or every
    /// event source is dropped. On return, every registered process has
    /// been stopped.
    pub fn run(self) {
        let mut targets: HashMap<u32, ProcRegistry> = HashMap::new();
        let ticker = tick(self.gather_interval);

        loop {
            crossbeam::select! {
                recv(self.spawn_rx) -> msg => match msg {
                    Ok(spawn) => self.handle_spawn(&mut targets, spawn),
                    Err(_) => break,
                },
                recv(self.exit_rx) -> msg => match msg {
                    Ok(exit) => self.handle_exit(&mut targets, exit),
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.handle_tick(&targets),
                recv(self.cancel_rx) -> _ => break,
            }
        }

        for (pid, registry) in targets.drain() {
            info!(pid, "supervisor stopping, tearing down process registry");
            registry.stop();
        }
    }

    fn handle_spawn(&self, targets: &mut HashMap<u32, ProcRegistry>, spawn: ProcSpawn) {
        if targets.contains_key(&spawn.pid) {
            error!(pid = spawn.pid, "spawn for an already-monitored pid, skipping");
            return;
        }

        let text = match fs::read_to_string(&spawn.config_path) {
            Ok(t) => t,
            Err(e) => {
                warn!(pid = spawn.pid, path = %spawn.config_path, error = %e, "failed to read process config");
                return;
            }
        };

        let config = match ProcConfig::from_yaml(&text) {
            Ok(c) => c,
            Err(e) => {
                warn!(pid = spawn.pid, error = %e, "failed to decode process config");
                return;
            }
        };

        let registry = match ProcRegistry::from_config(spawn.pid, &config, &self.push_opts) {
            Ok(r) => r,
            Err(e) => {
                warn!(pid = spawn.pid, error = %e, "failed to build process registry");
                return;
            }
        };

        registry.start();
        info!(pid = spawn.pid, filename = %spawn.filename, "now monitoring process");
        targets.insert(spawn.pid, registry);
    }

    fn handle_exit(&self, targets: &mut HashMap<u32, ProcRegistry>, exit: ProcExit) {
        if let Some(registry) = targets.remove(&exit.pid) {
            registry.stop();
            info!(pid = exit.pid, code = exit.code, "stopped monitoring exited process");
        }
    }

    fn handle_tick(&self, targets: &HashMap<u32, ProcRegistry>) {
        let mut merged: BTreeMap<u8, Vec<MetricFamily>> = BTreeMap::new();
        for (pid, registry) in targets {
            let (buckets, errs) = registry.gather();
            if !errs.is_empty() {
                warn!(pid, error = %errs, "gather reported errors");
            }
            for (level, families) in buckets {
                merged.entry(level).or_default().extend(families);
            }
        }

        if merged.is_empty() {
            return;
        }

        if let Err(e) = self.sink.write(&merged) {
            warn!(error = %e, "sink delivery failed");
        }
    }
}
