// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Run-level control plane: dispatch, result draining, timeout and
//! stop-on-error handling, stop/halt/resume broadcasts and escalation.

use crate::aggregate::{ForcedKills, reduce_exit_codes};
use crate::errors::{Error, Result};
use crate::os::OsControl;
use crate::policy::{Dispatcher, SchedulingPolicy};
use crate::signal_bus::{Registration, SignalBus, SignalTarget};
use crate::state::RunState;
use crate::stress::{StressModulator, StressSettings};
use crate::worker::{InstanceCommand, ResultRecord, WorkerContext, WorkerPool};
use crossbeam_channel::{RecvTimeoutError, unbounded};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

pub const DEFAULT_PID_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const WATCH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub policy: SchedulingPolicy,
    /// Number of execution units, i.e. the maximum number of concurrent instances.
    pub execution_units: usize,
    /// Time limit of the run. `None` runs until every instance exits.
    pub timeout: Option<Duration>,
    pub stop_on_error: bool,
    pub pid_wait_timeout: Duration,
    /// Time instances get to honor the safe interrupt before being killed.
    pub stop_grace: Duration,
    pub stress: Option<StressSettings>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::default(),
            execution_units: 1,
            timeout: None,
            stop_on_error: false,
            pid_wait_timeout: DEFAULT_PID_WAIT_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            stress: None,
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    /// Every collected record, forced-kill overrides applied.
    pub records: Vec<ResultRecord>,
    pub status: i32,
    pub time_limit_reached: bool,
}

pub struct ExecutionCoordinator {
    settings: ExecutionSettings,
    os: Arc<dyn OsControl>,
    pool: Arc<WorkerPool>,
    state: Mutex<RunState>,
    forced: ForcedKills,
    _registration: Registration,
}

impl ExecutionCoordinator {
    /// Build a coordinator registered on `bus` for as long as it lives.
    pub fn new(
        settings: ExecutionSettings,
        os: Arc<dyn OsControl>,
        bus: &SignalBus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let target: Weak<dyn SignalTarget> = weak.clone();
            Self {
                settings,
                os,
                pool: Arc::new(WorkerPool::default()),
                state: Mutex::new(RunState::Created),
                forced: ForcedKills::default(),
                _registration: bus.register(target),
            }
        })
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.can_transition_to(next) {
            debug!("run state {} -> {next}", *state);
            *state = next;
        } else {
            debug!("ignoring run state change {} -> {next}", *state);
        }
    }

    /// Run `commands` to completion with the configured policy.
    ///
    /// Fails before spawning anything when there is nothing to run or no
    /// execution unit to run it on. A coordinator runs exactly once.
    pub fn execute_instances(&self, commands: Vec<InstanceCommand>) -> Result<RunOutcome> {
        if commands.is_empty() {
            return Err(Error::NoCommands);
        }
        if self.settings.execution_units == 0 {
            return Err(Error::NoExecutionUnits);
        }
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != RunState::Created {
                return Err(Error::AlreadyStarted);
            }
            *state = RunState::Running;
        }

        info!(
            "executing {} instances on {} execution units ({} policy)",
            commands.len(),
            self.settings.execution_units,
            self.settings.policy
        );

        let (results_tx, results) = unbounded();
        let (pids_tx, pids) = unbounded();
        let ctx = WorkerContext {
            results: results_tx,
            pids: pids_tx,
            os: Arc::clone(&self.os),
        };

        let modulator = self.settings.stress.as_ref().and_then(|stress| {
            StressModulator::start(stress, Arc::clone(&self.pool), Arc::clone(&self.os))
                .inspect_err(|e| error!("stress modulation disabled: {e}"))
                .ok()
        });

        let dispatcher = Dispatcher {
            pool: &self.pool,
            ctx: &ctx,
            pids: &pids,
            units: self.settings.execution_units,
            pid_wait_timeout: self.settings.pid_wait_timeout,
        };
        self.settings.policy.dispatch(commands, &dispatcher);
        drop(ctx);

        let deadline = self.settings.timeout.map(|t| (t, Instant::now() + t));
        let mut records = Vec::new();
        let mut time_limit_reached = false;
        let mut stopped_on_error = false;

        loop {
            let any_alive = self.pool.any_alive();

            if let Some((limit, at)) = deadline
                && !time_limit_reached
                && Instant::now() >= at
            {
                time_limit_reached = true;
                warn!(
                    "time limit of {}s reached, stopping all instances",
                    limit.as_secs()
                );
                self.transition(RunState::TimedOut);
                self.stop_threads();
            }

            for notice in pids.try_iter() {
                info!("[{}] started (pid={})", notice.worker, notice.pid);
            }

            let mut drained: Vec<ResultRecord> = results.try_iter().collect();
            if drained.is_empty() {
                if !any_alive {
                    break;
                }
                match results.recv_timeout(WATCH_INTERVAL) {
                    Ok(record) => drained.push(record),
                    Err(RecvTimeoutError::Timeout) => {}
                    // Senders are gone but a thread is still winding down.
                    Err(RecvTimeoutError::Disconnected) => std::thread::sleep(WATCH_INTERVAL),
                }
            }

            let failed = drained.iter().any(|r| !r.is_ok());
            for record in drained {
                debug!("PID-{} finished with {}", record.pid, record.exit_code);
                records.push(record);
            }

            if failed && self.settings.stop_on_error && !stopped_on_error {
                stopped_on_error = true;
                warn!("an instance failed, stopping the remaining instances");
                self.transition(RunState::Stopping);
                self.stop_threads();
            }
        }

        if let Some(modulator) = modulator {
            modulator.stop();
        }
        self.pool.join_all();

        self.forced.apply(&mut records);
        let status = reduce_exit_codes(records.iter().map(|r| r.exit_code));
        self.transition(RunState::Drained);
        info!(
            "collected {} results, run status {status}{}",
            records.len(),
            if time_limit_reached {
                " (time limit reached)"
            } else {
                ""
            }
        );

        Ok(RunOutcome {
            records,
            status,
            time_limit_reached,
        })
    }

    /// Ask every alive instance to stop, then kill the ones still running
    /// once the grace period is over.
    pub fn stop_threads(&self) {
        self.pool.set_stopping();
        let alive = self.pool.alive_handles();
        if alive.is_empty() {
            debug!("no alive instances to stop");
            return;
        }

        // A suspended process cannot act on the interrupt.
        self.resume_threads();

        let signal = self.os.safe_signal();
        for handle in &alive {
            if handle.pid().is_none() {
                continue;
            }
            info!("[{}] sending {signal}", handle.name());
            if let Err(e) = self.os.safe_kill(handle, signal) {
                warn!("[{}] failed to send {signal}: {e}", handle.name());
            }
        }

        if self.pool.wait_all_finished(self.settings.stop_grace) {
            return;
        }
        warn!(
            "grace period of {}s elapsed, killing remaining instances",
            self.settings.stop_grace.as_secs()
        );
        for handle in self.pool.alive_handles() {
            let Some(pid) = handle.pid() else {
                continue;
            };
            // Marked before the kill so the record can never be reported raw.
            self.forced.insert(handle.name(), pid);
            if let Err(e) = self.os.stop_thread(&handle) {
                warn!("[{}] failed to kill PID-{pid}: {e}", handle.name());
                self.forced.remove(handle.name(), pid);
            }
        }
    }

    pub fn halt_threads(&self) {
        let _transition = self.pool.transition_lock();
        for handle in self.pool.alive_handles() {
            if let Err(e) = self.os.halt_thread(&handle) {
                warn!("[{}] failed to halt: {e}", handle.name());
            }
        }
    }

    pub fn resume_threads(&self) {
        let _transition = self.pool.transition_lock();
        for handle in self.pool.alive_handles() {
            if let Err(e) = self.os.resume_thread(&handle) {
                warn!("[{}] failed to resume: {e}", handle.name());
            }
        }
    }
}

impl SignalTarget for ExecutionCoordinator {
    fn on_interrupt(&self) {
        if self.state().is_active() {
            info!("stop requested, stopping all instances");
            self.transition(RunState::Stopping);
        }
        self.stop_threads();
    }

    fn on_suspend(&self) {
        info!("halting all instances");
        self.halt_threads();
    }

    fn on_continue(&self) {
        info!("resuming all instances");
        self.resume_threads();
    }
}
