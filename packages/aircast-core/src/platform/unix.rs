//! Unix process control via signals.

use std::process::Command;

use super::ProcessControl;

pub struct UnixProcessControl;

impl UnixProcessControl {
    fn signal(pid: u32, sig: libc::c_int) -> std::io::Result<()> {
        // Safety note: kill(2) with a valid pid and signal has no memory
        // effects; the unsafe block wraps only the FFI call.
        let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

impl ProcessControl for UnixProcessControl {
    fn is_process_alive(&self, pid: u32) -> bool {
        // Signal 0 probes existence. EPERM means the process exists but
        // belongs to another user; it still counts as alive.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        Self::signal(pid, libc::SIGTERM)
    }

    fn kill_process_tree(&self, pid: u32) -> std::io::Result<()> {
        // Children first (best effort), then the process itself.
        let _ = Command::new("pkill")
            .args(["-KILL", "-P", &pid.to_string()])
            .status();
        match Self::signal(pid, libc::SIGKILL) {
            Ok(()) => Ok(()),
            // Already gone is success for a kill.
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn find_processes_matching(&self, needle: &str) -> Vec<u32> {
        let output = match Command::new("pgrep").args(["-f", needle]).output() {
            Ok(out) => out,
            Err(e) => {
                log::debug!("[Platform] pgrep unavailable: {}", e);
                return Vec::new();
            }
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        let control = UnixProcessControl;
        assert!(control.is_process_alive(std::process::id()));
    }

    #[test]
    fn nonexistent_pid_is_dead() {
        let control = UnixProcessControl;
        // Pid near the default pid_max ceiling; vanishingly unlikely to exist.
        assert!(!control.is_process_alive(4_194_000));
    }
}
