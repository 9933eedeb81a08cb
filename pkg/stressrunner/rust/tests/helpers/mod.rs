// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use dd_stress_runner::os::LinuxControl;
use dd_stress_runner::{ExecutionCoordinator, ExecutionSettings, InstanceCommand, SignalBus};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// `/bin/sh -c <script>` as an instance command.
pub fn sh(script: &str) -> InstanceCommand {
    InstanceCommand::new(vec!["/bin/sh".into(), "-c".into(), script.into()])
}

/// A long sleeper that ignores the safe interrupt and has to be killed.
pub fn stubborn_sleeper() -> InstanceCommand {
    sh("trap '' INT; exec sleep 120")
}

/// Coordinator driving real processes through the Linux process control.
/// Commands are run as given, without the nice/taskset wrapping.
pub fn linux_coordinator(
    settings: ExecutionSettings,
    bus: &SignalBus,
) -> Arc<ExecutionCoordinator> {
    ExecutionCoordinator::new(settings, Arc::new(LinuxControl::new()), bus)
}

/// Write a run configuration into `dir` and return its path.
pub fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("stress-runner.yaml");
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}

/// Handle to a running dd-stress-runner process.
pub struct RunnerHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _stdout_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl RunnerHandle {
    /// Start the runner with `DD_STRESS_RUNNER_CONFIG` pointing at `config`.
    pub fn start(config: &Path, extra_args: &[&str]) -> Self {
        let bin = env!("CARGO_BIN_EXE_dd-stress-runner");
        let mut child = Command::new(bin)
            .args(extra_args)
            .env("DD_STRESS_RUNNER_CONFIG", config)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start dd-stress-runner");

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));

        Self {
            child,
            _stdout_thread: collect_lines(stdout, Arc::clone(&log_lines), "runner"),
            _stderr_thread: collect_lines(stderr, Arc::clone(&log_lines), "runner:err"),
            log_lines,
        }
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count_log_matches(pattern) > 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn count_log_matches(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to signal dd-stress-runner");
    }

    /// Wait for the runner to exit, killing it once `timeout` elapsed.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check dd-stress-runner status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed runner");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn collect_lines<R: std::io::Read + Send + 'static>(
    pipe: R,
    lines: Arc<Mutex<Vec<String>>>,
    tag: &'static str,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(pipe).lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{tag}] {l}");
                    lines.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}
