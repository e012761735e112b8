//! Platform process-control capability.
//!
//! Supervisors own subprocess lifecycles through this trait instead of
//! platform conditionals. The orchestrator needs four capabilities beyond
//! what `tokio::process` gives a parent: liveness checks for processes it
//! did not spawn, graceful termination by pid, forced tree kills, and a
//! command-line scan for orphaned encoders left by a previous run.

use std::sync::Arc;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

/// OS process control, implemented per platform.
pub trait ProcessControl: Send + Sync {
    /// Returns whether a process with this pid currently exists.
    fn is_process_alive(&self, pid: u32) -> bool;

    /// Requests graceful termination (SIGTERM / taskkill without /F).
    fn terminate(&self, pid: u32) -> std::io::Result<()>;

    /// Forcefully kills the process and any children it spawned.
    fn kill_process_tree(&self, pid: u32) -> std::io::Result<()>;

    /// Returns pids of processes whose command line contains `needle`.
    ///
    /// Used once at startup to find orphaned encoders; the needle is the
    /// source-URL tag that every encoder invocation carries.
    fn find_processes_matching(&self, needle: &str) -> Vec<u32>;
}

/// Returns the process controller for the current platform.
#[must_use]
pub fn native() -> Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        Arc::new(unix::UnixProcessControl)
    }
    #[cfg(windows)]
    {
        Arc::new(windows::WindowsProcessControl)
    }
}
