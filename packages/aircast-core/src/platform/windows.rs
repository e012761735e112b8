//! Windows process control via Win32 and taskkill.

use std::process::Command;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_TERMINATE,
};

use super::ProcessControl;

/// GetExitCodeProcess sentinel for a still-running process.
const STILL_ACTIVE: u32 = 259;

pub struct WindowsProcessControl;

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

fn open(pid: u32, access: u32) -> Option<OwnedHandle> {
    let handle = unsafe { OpenProcess(access, 0, pid) };
    if handle.is_null() {
        None
    } else {
        Some(OwnedHandle(handle))
    }
}

impl ProcessControl for WindowsProcessControl {
    fn is_process_alive(&self, pid: u32) -> bool {
        let Some(handle) = open(pid, PROCESS_QUERY_LIMITED_INFORMATION) else {
            return false;
        };
        let mut code: u32 = 0;
        let ok = unsafe { GetExitCodeProcess(handle.0, &mut code) };
        ok != 0 && code == STILL_ACTIVE
    }

    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        // Console processes have no SIGTERM equivalent; taskkill without /F
        // posts WM_CLOSE / CTRL_CLOSE which well-behaved encoders honor.
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T"])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "taskkill exited with {status}"
            )))
        }
    }

    fn kill_process_tree(&self, pid: u32) -> std::io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status();
        if matches!(status, Ok(s) if s.success()) {
            return Ok(());
        }
        // Fall back to TerminateProcess on the root pid.
        match open(pid, PROCESS_TERMINATE) {
            Some(handle) => {
                let ok = unsafe { TerminateProcess(handle.0, 1) };
                if ok != 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error())
                }
            }
            // Already gone is success for a kill.
            None => Ok(()),
        }
    }

    fn find_processes_matching(&self, needle: &str) -> Vec<u32> {
        // CIM query over command lines; the needle is embedded in a -like
        // pattern. Single quotes in the needle are doubled for PowerShell.
        let escaped = needle.replace('\'', "''");
        let script = format!(
            "Get-CimInstance Win32_Process | Where-Object {{ $_.CommandLine -like '*{escaped}*' }} | ForEach-Object {{ $_.ProcessId }}"
        );
        let output = match Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()
        {
            Ok(out) => out,
            Err(e) => {
                log::debug!("[Platform] powershell unavailable: {}", e);
                return Vec::new();
            }
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }
}
