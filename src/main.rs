//! `abyssd` — loads a process configuration, starts the supervisor against
//! it, and ships gathered metrics as line-protocol text on stdout.
//!
//! Usage: `abyssd <config.yaml> [gather-interval]`
//!
//! Real process spawn/exit events come from eBPF tracing, out of scope here
//! (see [`abyss::bpf`]); this binary simulates a single spawn for its own
//! pid at startup and reacts to `exit` typed on stdin to demonstrate the
//! supervisor's lifecycle end to end.

use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use abyss::bpf::{ProcExit, ProcSpawn};
use abyss::pushfunc::PushFuncOpts;
use abyss::sink::LineProtocolSink;
use abyss::Supervisor;
use crossbeam::channel::bounded;

const DEFAULT_GATHER_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("usage: abyssd <config.yaml> [gather-interval-seconds]");
        return ExitCode::FAILURE;
    };
    let gather_interval = args
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .map_or(DEFAULT_GATHER_INTERVAL, Duration::from_secs);

    let (spawn_tx, spawn_rx) = bounded::<ProcSpawn>(1);
    let (exit_tx, exit_rx) = bounded::<ProcExit>(1);
    let (cancel_tx, cancel_rx) = bounded::<()>(0);

    let sink = Arc::new(LineProtocolSink::new(std::io::stdout()));
    let supervisor = Supervisor::new(
        spawn_rx,
        exit_rx,
        cancel_rx,
        gather_interval,
        PushFuncOpts::default(),
        sink,
    );

    let pid = std::process::id();
    let handle = std::thread::spawn(move || supervisor.run());

    if spawn_tx
        .send(ProcSpawn {
            pid,
            ppid: 0,
            filename: std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            config_path,
        })
        .is_err()
    {
        eprintln!("supervisor exited before accepting the initial spawn event");
        return ExitCode::FAILURE;
    }

    tracing::info!(pid, "spawned self for monitoring, type \"exit\" to stop");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines().map_while(Result::ok) {
        if line.trim() == "exit" {
            let _ = exit_tx.send(ProcExit { pid, ppid: 0, code: 0 });
            break;
        }
    }

    drop(cancel_tx);
    let _ = handle.join();
    ExitCode::SUCCESS
}
