// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{OsControl, ProcessSignal};
use crate::errors::{Error, Result};
use crate::worker::WorkerHandle;
use log::{debug, warn};
use std::process::Command;

const PRIORITY_FLAGS: [&str; 5] = ["/LOW", "/BELOWNORMAL", "/NORMAL", "/ABOVENORMAL", "/HIGH"];
const MAX_AFFINITY_UNIT: u32 = 63;

/// Windows process control: `start /AFFINITY` wrapping, console break events
/// and thread suspension.
#[derive(Debug, Default)]
pub struct WindowsControl;

impl WindowsControl {
    pub fn new() -> Self {
        Self
    }

    pub fn priority_flag(priority: u8) -> &'static str {
        let idx = usize::from(priority.min(100).abs_diff(1) / 20);
        PRIORITY_FLAGS.get(idx).copied().unwrap_or("/HIGH")
    }

    pub fn affinity_mask(unit: u32) -> String {
        let unit = if unit > MAX_AFFINITY_UNIT {
            warn!("execution unit {unit} exceeds the affinity mask width, wrapping");
            unit % (MAX_AFFINITY_UNIT + 1)
        } else {
            unit
        };
        format!("0x{:X}", 1u64 << unit)
    }
}

impl OsControl for WindowsControl {
    fn platform_name(&self) -> &'static str {
        "windows"
    }

    fn is_unix(&self) -> bool {
        false
    }

    fn configure_spawn(&self, cmd: &mut Command) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }
        #[cfg(not(windows))]
        let _ = cmd;
    }

    fn set_priority(&self, priority: u8) -> Vec<String> {
        vec![Self::priority_flag(priority).to_string()]
    }

    fn generate_os_command(&self, unit: u32, priority: u8, command: &[String]) -> Vec<String> {
        let mut cmd: Vec<String> = ["cmd", "/c", "start", "/wait", "/b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        cmd.extend(self.set_priority(priority));
        cmd.push("/AFFINITY".to_string());
        cmd.push(Self::affinity_mask(unit));
        cmd.extend_from_slice(command);
        debug!("generated OS command: {}", cmd.join(" "));
        cmd
    }

    fn safe_kill(&self, worker: &WorkerHandle, signal: ProcessSignal) -> Result<()> {
        let pid = running_pid(worker)?;
        // CTRL_BREAK is the only console event deliverable to a single group.
        match signal {
            ProcessSignal::Interrupt | ProcessSignal::Terminate => sys::console_break(pid),
            ProcessSignal::Suspend => sys::suspend_threads(pid, true),
            ProcessSignal::Continue => sys::suspend_threads(pid, false),
            ProcessSignal::Kill => sys::taskkill(pid),
        }
    }

    fn halt_thread(&self, worker: &WorkerHandle) -> Result<()> {
        if worker.is_halted() {
            return Ok(());
        }
        sys::suspend_threads(running_pid(worker)?, true)?;
        worker.set_halted(true);
        Ok(())
    }

    fn resume_thread(&self, worker: &WorkerHandle) -> Result<()> {
        if !worker.is_halted() {
            return Ok(());
        }
        sys::suspend_threads(running_pid(worker)?, false)?;
        worker.set_halted(false);
        Ok(())
    }

    fn stop_thread(&self, worker: &WorkerHandle) -> Result<()> {
        let pid = running_pid(worker)?;
        debug!(
            "[{}] running taskkill since it failed to stop when requested",
            worker.name()
        );
        sys::taskkill(pid)
    }
}

fn running_pid(worker: &WorkerHandle) -> Result<u32> {
    worker
        .pid()
        .ok_or_else(|| Error::NoProcess(worker.name().to_string()))
}

#[cfg(windows)]
mod sys {
    use crate::errors::{Error, Result};
    use std::io;
    use std::process::{Command, Stdio};
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
    };
    use windows_sys::Win32::System::Threading::{
        OpenThread, ResumeThread, SuspendThread, THREAD_SUSPEND_RESUME,
    };

    fn last_error(pid: u32) -> Error {
        Error::Signal {
            pid,
            source: io::Error::last_os_error(),
        }
    }

    pub(super) fn console_break(pid: u32) -> Result<()> {
        // SAFETY: plain FFI call, the group id is the pid of a process
        // spawned with CREATE_NEW_PROCESS_GROUP.
        if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } == 0 {
            return Err(last_error(pid));
        }
        Ok(())
    }

    pub(super) fn suspend_threads(pid: u32, suspend: bool) -> Result<()> {
        // SAFETY: the snapshot handle is checked and closed below.
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
        if snapshot == INVALID_HANDLE_VALUE {
            return Err(last_error(pid));
        }
        let _close = scopeguard::guard(snapshot, |h| {
            // SAFETY: `h` is the valid snapshot handle opened above.
            unsafe { CloseHandle(h) };
        });

        let mut entry = THREADENTRY32 {
            dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
            cntUsage: 0,
            th32ThreadID: 0,
            th32OwnerProcessID: 0,
            tpBasePri: 0,
            tpDeltaPri: 0,
            dwFlags: 0,
        };
        let mut touched = 0usize;
        // SAFETY: `entry` is initialised with its size as the API requires.
        let mut more = unsafe { Thread32First(snapshot, &mut entry) } != 0;
        while more {
            if entry.th32OwnerProcessID == pid {
                // SAFETY: the thread handle is checked and closed right away.
                let thread = unsafe { OpenThread(THREAD_SUSPEND_RESUME, 0, entry.th32ThreadID) };
                if !thread.is_null() {
                    // SAFETY: `thread` is a valid handle opened with suspend/resume rights.
                    let rc = unsafe {
                        if suspend {
                            SuspendThread(thread)
                        } else {
                            ResumeThread(thread)
                        }
                    };
                    // SAFETY: closes the handle opened above exactly once.
                    unsafe { CloseHandle(thread) };
                    if rc != u32::MAX {
                        touched += 1;
                    }
                }
            }
            // SAFETY: same snapshot and entry as above.
            more = unsafe { Thread32Next(snapshot, &mut entry) } != 0;
        }

        if touched == 0 {
            return Err(Error::NoProcess(format!("pid {pid}")));
        }
        Ok(())
    }

    pub(super) fn taskkill(pid: u32) -> Result<()> {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| Error::Signal { pid, source })?;
        if !status.success() {
            return Err(Error::Signal {
                pid,
                source: io::Error::other(format!("taskkill exited with {status}")),
            });
        }
        Ok(())
    }
}

#[cfg(not(windows))]
mod sys {
    use crate::errors::{Error, Result};

    fn unsupported(what: &str) -> Error {
        Error::UnsupportedPlatform(format!("{what} is only available on windows"))
    }

    pub(super) fn console_break(_pid: u32) -> Result<()> {
        Err(unsupported("GenerateConsoleCtrlEvent"))
    }

    pub(super) fn suspend_threads(_pid: u32, _suspend: bool) -> Result<()> {
        Err(unsupported("thread suspension"))
    }

    pub(super) fn taskkill(_pid: u32) -> Result<()> {
        Err(unsupported("taskkill"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_flag() {
        assert_eq!(WindowsControl::priority_flag(0), "/LOW");
        assert_eq!(WindowsControl::priority_flag(1), "/LOW");
        assert_eq!(WindowsControl::priority_flag(21), "/BELOWNORMAL");
        assert_eq!(WindowsControl::priority_flag(50), "/NORMAL");
        assert_eq!(WindowsControl::priority_flag(75), "/ABOVENORMAL");
        assert_eq!(WindowsControl::priority_flag(100), "/HIGH");
    }

    #[test]
    fn test_generate_os_command() {
        let control = WindowsControl::new();
        let cmd = control.generate_os_command(4, 100, &["imc.exe".to_string()]);
        assert_eq!(
            cmd,
            vec![
                "cmd", "/c", "start", "/wait", "/b", "/HIGH", "/AFFINITY", "0x10", "imc.exe"
            ]
        );
    }

    #[test]
    fn test_numa_binding_unsupported() {
        let control = WindowsControl::new();
        let err = control
            .generate_numa_command(4, 0, 50, &["imc.exe".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_affinity_mask() {
        assert_eq!(WindowsControl::affinity_mask(0), "0x1");
        assert_eq!(WindowsControl::affinity_mask(11), "0x800");
        assert_eq!(WindowsControl::affinity_mask(64), "0x1");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_primitives_unsupported_off_windows() {
        let control = WindowsControl::new();
        let handle = WorkerHandle::new("w".into());
        handle.attach(1);
        assert!(matches!(
            control.halt_thread(&handle),
            Err(Error::UnsupportedPlatform(_))
        ));
        assert!(!handle.is_halted());
    }
}
