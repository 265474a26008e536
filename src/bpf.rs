//! Process lifecycle events the supervisor reacts to. Real production of
//! these events comes from eBPF exec/exit tracing, which is out of scope —
//! this module only defines the message shapes consumed across that
//! boundary.

/// A monitored process started, requesting observation via the
/// `-bpfMonitor -bpfMonConfig=<path>` opt-in protocol.
#[derive(Debug, Clone)]
pub struct ProcSpawn {
    /// The new process id.
    pub pid: u32,
    /// Its parent's process id.
    pub ppid: u32,
    /// The executed binary path.
    pub filename: String,
    /// Path to the process's Abyss configuration file.
    pub config_path: String,
}

/// A previously-spawned monitored process exited.
#[derive(Debug, Clone)]
pub struct ProcExit {
    /// The exited process id.
    pub pid: u32,
    /// Its parent's process id.
    pub ppid: u32,
    /// The process's exit code.
    pub code: i32,
}
