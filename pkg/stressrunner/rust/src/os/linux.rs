// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{OsControl, ProcessSignal};
use crate::errors::{Error, Result};
use crate::worker::WorkerHandle;
use log::debug;
use std::process::Command;

/// Linux process control: `nice` + `taskset` wrapping, POSIX signals sent to
/// the instance's process group.
#[derive(Debug, Default)]
pub struct LinuxControl;

impl LinuxControl {
    pub fn new() -> Self {
        Self
    }

    /// Map a 0-100 priority onto a nice value (100 -> -20, 0 -> 19).
    /// Negative values need root, so they fall back to 0 otherwise.
    pub fn nice_value(priority: u8) -> i32 {
        let nice = (f64::from(priority.min(100)) / 100.0 * -39.0 + 19.0).round_ties_even() as i32;
        if nice < 0 && !is_root() {
            return 0;
        }
        nice
    }
}

impl OsControl for LinuxControl {
    fn platform_name(&self) -> &'static str {
        "linux"
    }

    fn is_unix(&self) -> bool {
        true
    }

    fn configure_spawn(&self, cmd: &mut Command) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group per instance: signals reach helpers the tool forks,
            // and a terminal Ctrl-C only reaches the runner.
            cmd.process_group(0);
        }
        #[cfg(not(unix))]
        let _ = cmd;
    }

    fn set_priority(&self, priority: u8) -> Vec<String> {
        vec![
            "nice".to_string(),
            "-n".to_string(),
            Self::nice_value(priority).to_string(),
        ]
    }

    fn generate_os_command(&self, unit: u32, priority: u8, command: &[String]) -> Vec<String> {
        let mut cmd = self.set_priority(priority);
        cmd.extend(["taskset".to_string(), "-c".to_string(), unit.to_string()]);
        cmd.extend_from_slice(command);
        debug!("generated OS command: {}", cmd.join(" "));
        cmd
    }

    fn generate_numa_command(
        &self,
        unit: u32,
        node: u32,
        priority: u8,
        command: &[String],
    ) -> Result<Vec<String>> {
        let mut cmd = self.set_priority(priority);
        cmd.extend([
            "numactl".to_string(),
            format!("--membind={node}"),
            format!("--physcpubind={unit}"),
        ]);
        cmd.extend_from_slice(command);
        debug!("generated NUMA command: {}", cmd.join(" "));
        Ok(cmd)
    }

    fn safe_kill(&self, worker: &WorkerHandle, signal: ProcessSignal) -> Result<()> {
        signal_group(worker, signal)
    }

    fn halt_thread(&self, worker: &WorkerHandle) -> Result<()> {
        if worker.is_halted() {
            return Ok(());
        }
        signal_group(worker, ProcessSignal::Suspend)?;
        worker.set_halted(true);
        Ok(())
    }

    fn resume_thread(&self, worker: &WorkerHandle) -> Result<()> {
        if !worker.is_halted() {
            return Ok(());
        }
        signal_group(worker, ProcessSignal::Continue)?;
        worker.set_halted(false);
        Ok(())
    }

    fn stop_thread(&self, worker: &WorkerHandle) -> Result<()> {
        debug!(
            "[{}] sending SIGKILL since it failed to stop when requested",
            worker.name()
        );
        signal_group(worker, ProcessSignal::Kill)
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(unix)]
fn signal_group(worker: &WorkerHandle, signal: ProcessSignal) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = worker
        .pid()
        .ok_or_else(|| Error::NoProcess(worker.name().to_string()))?;
    let raw = i32::try_from(pid).map_err(|_| Error::Signal {
        pid,
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    let sig = match signal {
        ProcessSignal::Interrupt => Signal::SIGINT,
        ProcessSignal::Terminate => Signal::SIGTERM,
        ProcessSignal::Suspend => Signal::SIGSTOP,
        ProcessSignal::Continue => Signal::SIGCONT,
        ProcessSignal::Kill => Signal::SIGKILL,
    };
    killpg(Pid::from_raw(raw), sig).map_err(|e| Error::Signal {
        pid,
        source: e.into(),
    })
}

#[cfg(not(unix))]
fn signal_group(worker: &WorkerHandle, _signal: ProcessSignal) -> Result<()> {
    Err(Error::UnsupportedPlatform(format!(
        "POSIX signals for {}",
        worker.name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_nice_value_bounds() {
        assert_eq!(LinuxControl::nice_value(0), 19);
        assert_eq!(LinuxControl::nice_value(50), 0);
        if is_root() {
            assert_eq!(LinuxControl::nice_value(100), -20);
        } else {
            assert_eq!(LinuxControl::nice_value(100), 0);
        }
    }

    #[test]
    fn test_generate_os_command() {
        let control = LinuxControl::new();
        let cmd = control.generate_os_command(2, 50, &strings(&["imc", "--xml", "a.xml"]));
        assert_eq!(
            cmd,
            strings(&["nice", "-n", "0", "taskset", "-c", "2", "imc", "--xml", "a.xml"])
        );
    }

    #[test]
    fn test_generate_numa_command() {
        let control = LinuxControl::new();
        let cmd = control
            .generate_numa_command(2, 1, 0, &strings(&["imc", "a.xml"]))
            .unwrap();
        assert_eq!(
            cmd,
            strings(&[
                "nice",
                "-n",
                "19",
                "numactl",
                "--membind=1",
                "--physcpubind=2",
                "imc",
                "a.xml"
            ])
        );
    }

    #[test]
    fn test_signal_without_process() {
        let control = LinuxControl::new();
        let handle = WorkerHandle::new("idle".into());
        let err = control
            .safe_kill(&handle, ProcessSignal::Interrupt)
            .unwrap_err();
        assert!(matches!(err, Error::NoProcess(_)));
        assert!(control.halt_thread(&handle).is_err());
        assert!(!handle.is_halted());
    }

    #[cfg(unix)]
    #[test]
    fn test_halt_and_resume_real_process() {
        let control = LinuxControl::new();
        let mut cmd = Command::new("/bin/sleep");
        cmd.arg("30");
        control.configure_spawn(&mut cmd);
        let mut child = cmd.spawn().unwrap();

        let handle = WorkerHandle::new("sleeper".into());
        handle.attach(child.id());

        control.halt_thread(&handle).unwrap();
        assert!(handle.is_halted());
        // Already halted: no second SIGSTOP, still halted.
        control.halt_thread(&handle).unwrap();
        assert!(handle.is_halted());

        control.resume_thread(&handle).unwrap();
        assert!(!handle.is_halted());

        control.stop_thread(&handle).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
