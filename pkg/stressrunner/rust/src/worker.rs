// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Worker threads. Each worker owns one external process at a time, streams
//! its output into the log and publishes one [`ResultRecord`] per command.

use crate::errors::{Error, Result};
use crate::exit_code;
use crate::os::OsControl;
use crossbeam_channel::{Receiver, Sender};
use log::{Level, debug, error, info, log, warn};
use phf::phf_set;
use scopeguard::ScopeGuard;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The validation tool prefixes every log line with a bracketed level tag
/// (`[DEBUG]`, `[INFO]`, `[ERROR]`, ...). Lines at debug and info level are
/// chatter and are neither logged nor kept in the record. Plain words such as
/// "information" in a result line do not count.
static NOISE_TAGS: phf::Set<&'static str> = phf_set! {
    "[debug]",
    "[info]",
};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fully wrapped argv of one validation instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCommand(Vec<String>);

impl InstanceCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self(argv)
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for InstanceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Terminal outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    /// Name of the worker thread that ran the command.
    pub worker: String,
    pub pid: u32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

impl ResultRecord {
    pub fn is_ok(&self) -> bool {
        self.exit_code == exit_code::OK
    }
}

/// Published once per spawned process, before any of its output is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidNotice {
    pub worker: String,
    pub pid: u32,
}

/// State of a worker shared with the coordinator and the OS layer.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    // 0 while no process is attached.
    pid: AtomicU32,
    halted: AtomicBool,
}

impl WorkerHandle {
    pub fn new(name: String) -> Self {
        Self {
            name,
            pid: AtomicU32::new(0),
            halted: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Only called by `OsControl` implementations under the pool's
    /// transition lock.
    pub(crate) fn set_halted(&self, halted: bool) {
        self.halted.store(halted, Ordering::SeqCst);
    }

    /// A freshly spawned process is running, whatever happened to the
    /// previous one.
    pub(crate) fn attach(&self, pid: u32) {
        self.halted.store(false, Ordering::SeqCst);
        self.pid.store(pid, Ordering::SeqCst);
    }

    /// A reaped process can no longer be halted; the next one starts running.
    pub(crate) fn detach(&self) {
        self.pid.store(0, Ordering::SeqCst);
        self.halted.store(false, Ordering::SeqCst);
    }
}

pub struct Worker {
    handle: Arc<WorkerHandle>,
    thread: JoinHandle<()>,
}

impl Worker {
    pub fn from_thread(handle: Arc<WorkerHandle>, thread: JoinHandle<()>) -> Self {
        Self { handle, thread }
    }

    pub fn handle(&self) -> &Arc<WorkerHandle> {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Poll until the thread has finished or `timeout` elapsed.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_alive() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        true
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("[{}] worker thread panicked", self.handle.name());
        }
    }
}

/// Channels and OS layer shared by every worker of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub results: Sender<ResultRecord>,
    pub pids: Sender<PidNotice>,
    pub os: Arc<dyn OsControl>,
}

pub enum CommandSource {
    /// Run one command and exit.
    Single(InstanceCommand),
    /// Pull commands until the queue is empty or `stopping` is set.
    Queue {
        queue: Receiver<InstanceCommand>,
        stopping: Arc<AtomicBool>,
    },
}

/// Start a named worker thread executing the commands of `source`.
pub fn spawn_worker(name: String, source: CommandSource, ctx: WorkerContext) -> Result<Worker> {
    let handle = Arc::new(WorkerHandle::new(name.clone()));
    let thread_handle = Arc::clone(&handle);
    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || match source {
            CommandSource::Single(command) => run_command(&thread_handle, &command, &ctx),
            CommandSource::Queue { queue, stopping } => {
                while !stopping.load(Ordering::SeqCst) {
                    let Ok(command) = queue.try_recv() else {
                        break;
                    };
                    run_command(&thread_handle, &command, &ctx);
                }
                debug!("[{}] no more commands", thread_handle.name());
            }
        })
        .map_err(|source| Error::ThreadSpawn { name, source })?;
    Ok(Worker::from_thread(handle, thread))
}

fn run_command(handle: &WorkerHandle, command: &InstanceCommand, ctx: &WorkerContext) {
    let name = handle.name();
    let Some((program, args)) = command.argv().split_first() else {
        warn!("[{name}] empty command, skipping");
        return;
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    ctx.os.configure_spawn(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("[{name}] failed to spawn {program}: {e}");
            return;
        }
    };
    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    handle.attach(pid);

    let mut child = scopeguard::guard(child, |mut c| {
        c.kill().ok();
        c.wait().ok();
        handle.detach();
    });

    debug!("[{name}] PID-{pid} about to start using {command}");
    if ctx
        .pids
        .send(PidNotice {
            worker: name.to_string(),
            pid,
        })
        .is_err()
    {
        debug!("[{name}] pid channel closed");
    }

    let (stdout, stderr) = thread::scope(|s| {
        let stderr_reader = stderr.map(|pipe| s.spawn(move || drain_pipe(name, pipe, Level::Error)));
        let stdout = stdout
            .map(|pipe| drain_pipe(name, pipe, Level::Info))
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        (stdout, stderr)
    });

    let status = match child.wait() {
        Ok(status) => status,
        Err(e) => {
            error!("[{name}] failed waiting for PID-{pid}: {e}");
            return;
        }
    };
    drop(ScopeGuard::into_inner(child));
    handle.detach();

    let exit_code = exit_code_of(status);
    info!("[{name}] PID-{pid} exited with {exit_code}");
    let record = ResultRecord {
        worker: name.to_string(),
        pid,
        stdout,
        stderr,
        exit_code,
    };
    if ctx.results.send(record).is_err() {
        warn!("[{name}] result channel closed, dropping record of PID-{pid}");
    }
}

fn drain_pipe<R: Read>(name: &str, pipe: R, level: Level) -> Vec<String> {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if is_noise(&line) {
                    continue;
                }
                log!(level, "[{name}] {line}");
                lines.push(line);
            }
            Err(e) => {
                warn!("[{name}] failed reading output: {e}");
                break;
            }
        }
    }
    lines
}

fn is_noise(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    NOISE_TAGS.iter().any(|tag| lower.contains(tag))
}

/// Normal exit yields the code, a signal yields its negated number.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    exit_code::UNKNOWN_STATUS_CODE
}

#[derive(Default)]
struct PoolWorkers {
    current: Vec<Worker>,
    retired: Vec<Worker>,
}

/// Workers of one run.
///
/// `current` is the batch (or queue pool) being watched; batches that were
/// superseded move to `retired` and stay reachable for stop, halt and resume.
#[derive(Default)]
pub(crate) struct WorkerPool {
    workers: Mutex<PoolWorkers>,
    transitions: Mutex<()>,
    stopping: Arc<AtomicBool>,
}

impl WorkerPool {
    fn workers(&self) -> MutexGuard<'_, PoolWorkers> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes every halted-flag transition of the run.
    pub(crate) fn transition_lock(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn stopping(&self) -> &Arc<AtomicBool> {
        &self.stopping
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub(crate) fn add(&self, worker: Worker) {
        self.workers().current.push(worker);
    }

    /// Start a new batch: the current workers are no longer watched by the
    /// stress loop but remain signalable.
    ///
    /// Halted workers are resumed first, since nothing halts or resumes a
    /// retired worker afterwards.
    pub(crate) fn retire_current(&self, os: &dyn OsControl) {
        let _transition = self.transition_lock();
        let mut workers = self.workers();
        let current = std::mem::take(&mut workers.current);
        for worker in current.iter().filter(|w| w.handle().is_halted()) {
            if let Err(e) = os.resume_thread(worker.handle()) {
                warn!("[{}] failed to resume before retiring: {e}", worker.name());
            }
        }
        workers.retired.extend(current);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        let workers = self.workers();
        workers.current.is_empty() && workers.retired.is_empty()
    }

    pub(crate) fn any_alive(&self) -> bool {
        let workers = self.workers();
        workers
            .current
            .iter()
            .chain(workers.retired.iter())
            .any(Worker::is_alive)
    }

    pub(crate) fn is_alive(&self, name: &str) -> bool {
        let workers = self.workers();
        workers
            .current
            .iter()
            .chain(workers.retired.iter())
            .any(|w| w.name() == name && w.is_alive())
    }

    /// Handles of every alive worker, current and retired.
    pub(crate) fn alive_handles(&self) -> Vec<Arc<WorkerHandle>> {
        let workers = self.workers();
        workers
            .current
            .iter()
            .chain(workers.retired.iter())
            .filter(|w| w.is_alive())
            .map(|w| Arc::clone(w.handle()))
            .collect()
    }

    /// Handles of the alive workers in the current batch.
    pub(crate) fn current_alive_handles(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers()
            .current
            .iter()
            .filter(|w| w.is_alive())
            .map(|w| Arc::clone(w.handle()))
            .collect()
    }

    /// Poll until no worker is alive or `timeout` elapsed. Returns whether
    /// every worker finished.
    pub(crate) fn wait_all_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.any_alive() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        true
    }

    /// Join every finished thread and empty the pool.
    pub(crate) fn join_all(&self) {
        let drained: Vec<Worker> = {
            let mut workers = self.workers();
            let mut all = std::mem::take(&mut workers.retired);
            all.append(&mut workers.current);
            all
        };
        for worker in drained {
            worker.join();
        }
    }
}
