// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Stress modulation: a background loop that halts and resumes workers so the
//! number of concurrently active instances follows a sine wave.

use crate::errors::{Error, Result};
use crate::os::OsControl;
use crate::worker::{WorkerHandle, WorkerPool};
use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::f64::consts::PI;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub struct StressSettings {
    /// Length of one full sine cycle.
    pub period: Duration,
    /// Delay between two ticks.
    pub control_interval: Duration,
    /// Upper bound on waiting for the loop to exit.
    pub join_timeout: Duration,
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            control_interval: Duration::from_millis(250),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Stress in `[0, 1]` at `elapsed` into the run.
pub fn stress_level(elapsed: Duration, period: Duration) -> f64 {
    if period.is_zero() {
        return 1.0;
    }
    let phase = 2.0 * PI * elapsed.as_secs_f64() / period.as_secs_f64();
    (phase.sin() + 1.0) / 2.0
}

/// Smallest number of active workers whose equal share covers `stress`.
///
/// The ratio is rounded to 10 decimals first so floating point noise cannot
/// push it over the next integer.
pub fn target_active(stress: f64, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    let share = stress / (1.0 / total as f64);
    let rounded = (share * 1e10).round() / 1e10;
    if rounded <= 0.0 {
        return 0;
    }
    (rounded.ceil() as usize).min(total)
}

/// Resume or halt workers of the current batch until the active count
/// matches the target for `stress`.
pub(crate) fn tick(pool: &WorkerPool, os: &dyn OsControl, stress: f64) {
    let _transition = pool.transition_lock();
    if pool.is_stopping() {
        return;
    }

    let alive = pool.current_alive_handles();
    let target = target_active(stress, alive.len());
    let (halted, active): (Vec<&Arc<WorkerHandle>>, Vec<&Arc<WorkerHandle>>) =
        alive.iter().partition(|h| h.is_halted());
    debug!(
        "stress {stress:.2}: target {target} of {} alive, {} active",
        alive.len(),
        active.len()
    );

    if active.len() < target {
        for handle in halted.into_iter().take(target - active.len()) {
            if let Err(e) = os.resume_thread(handle) {
                log_tick_error(handle, "resume", &e);
            }
        }
    } else if active.len() > target {
        let excess = active.len() - target;
        for handle in active.into_iter().take(excess) {
            if let Err(e) = os.halt_thread(handle) {
                log_tick_error(handle, "halt", &e);
            }
        }
    }
}

fn log_tick_error(handle: &WorkerHandle, action: &str, e: &Error) {
    match e {
        // Queue workers are briefly idle between two commands.
        Error::NoProcess(_) => debug!("[{}] nothing to {action}: {e}", handle.name()),
        _ => warn!("[{}] failed to {action}: {e}", handle.name()),
    }
}

pub struct StressModulator {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl StressModulator {
    pub(crate) fn start(
        settings: &StressSettings,
        pool: Arc<WorkerPool>,
        os: Arc<dyn OsControl>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let period = settings.period;
        let interval = settings.control_interval;
        info!(
            "stress modulation enabled (period={}s, interval={}ms)",
            period.as_secs_f64(),
            interval.as_millis()
        );

        let thread = thread::Builder::new()
            .name("stress-modulator".to_string())
            .spawn(move || {
                let started = Instant::now();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            tick(&pool, os.as_ref(), stress_level(started.elapsed(), period));
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("stress modulator exiting");
            })
            .map_err(|source| Error::ThreadSpawn {
                name: "stress-modulator".to_string(),
                source,
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            join_timeout: settings.join_timeout,
        })
    }

    /// Signal the loop and join it, giving up after the join timeout.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        let deadline = Instant::now() + self.join_timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "stress modulator did not exit within {}s, leaving it behind",
                    self.join_timeout.as_secs()
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if thread.join().is_err() {
            warn!("stress modulator thread panicked");
        }
    }
}

impl Drop for StressModulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::ProcessSignal;
    use crate::os::testing::FakeControl;
    use crate::worker::testing::parked_worker;

    fn pool_with(n: usize) -> (WorkerPool, Vec<Sender<()>>) {
        let pool = WorkerPool::default();
        let mut releases = Vec::new();
        for i in 0..n {
            let (worker, release) = parked_worker(&format!("worker-{i}"));
            pool.add(worker);
            releases.push(release);
        }
        (pool, releases)
    }

    fn halted_count(pool: &WorkerPool) -> usize {
        pool.current_alive_handles()
            .iter()
            .filter(|h| h.is_halted())
            .count()
    }

    #[test]
    fn test_target_active_bounds() {
        for total in 1..16 {
            assert_eq!(target_active(0.0, total), 0);
            assert_eq!(target_active(1.0, total), total);
        }
        assert_eq!(target_active(0.7, 0), 0);
    }

    #[test]
    fn test_target_active_monotonic() {
        for total in 1..12 {
            let mut previous = 0;
            for step in 0..=1000 {
                let target = target_active(f64::from(step) / 1000.0, total);
                assert!(target >= previous);
                previous = target;
            }
        }
    }

    #[test]
    fn test_target_active_suppresses_float_noise() {
        // 0.3 / (1/10) is 2.9999999999999996 in f64.
        assert_eq!(target_active(0.3, 10), 3);
        assert_eq!(target_active(0.5, 4), 2);
        assert_eq!(target_active(0.51, 4), 3);
    }

    #[test]
    fn test_stress_level_shape() {
        let period = Duration::from_secs(60);
        assert!((stress_level(Duration::ZERO, period) - 0.5).abs() < 1e-9);
        assert!((stress_level(Duration::from_secs(15), period) - 1.0).abs() < 1e-9);
        assert!(stress_level(Duration::from_secs(45), period).abs() < 1e-9);
    }

    #[test]
    fn test_tick_halts_and_resumes_to_target() {
        let (pool, _releases) = pool_with(4);
        let os = FakeControl::default();

        tick(&pool, &os, 0.0);
        assert_eq!(halted_count(&pool), 4);

        tick(&pool, &os, 0.5);
        assert_eq!(halted_count(&pool), 2);

        tick(&pool, &os, 1.0);
        assert_eq!(halted_count(&pool), 0);
        assert_eq!(os.count(ProcessSignal::Suspend), 4);
        assert_eq!(os.count(ProcessSignal::Continue), 4);
    }

    #[test]
    fn test_tick_ignores_retired_workers() {
        let (pool, _releases) = pool_with(2);
        let os = FakeControl::default();
        pool.retire_current(&os);
        tick(&pool, &os, 0.0);
        assert!(os.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batch_halted_by_tick_is_resumed_when_retired() {
        let (pool, _releases) = pool_with(3);
        let os = FakeControl::default();
        tick(&pool, &os, 0.4);
        assert_eq!(halted_count(&pool), 1);

        pool.retire_current(&os);
        let (next, _release) = parked_worker("worker-3");
        pool.add(next);
        tick(&pool, &os, 0.0);

        let halted: Vec<String> = pool
            .alive_handles()
            .iter()
            .filter(|h| h.is_halted())
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(halted, vec!["worker-3"]);
    }

    #[test]
    fn test_tick_skipped_while_stopping() {
        let (pool, _releases) = pool_with(3);
        pool.set_stopping();
        let os = FakeControl::default();
        tick(&pool, &os, 0.0);
        assert_eq!(halted_count(&pool), 0);
    }

    #[test]
    fn test_tick_errors_do_not_panic() {
        let (pool, _releases) = pool_with(2);
        let os = FakeControl {
            fail_halt: true,
            ..Default::default()
        };
        tick(&pool, &os, 0.0);
        assert_eq!(halted_count(&pool), 0);
    }

    #[test]
    fn test_modulator_runs_and_stops() {
        let (pool, _releases) = pool_with(2);
        let pool = Arc::new(pool);
        let os = Arc::new(FakeControl::default());
        let settings = StressSettings {
            period: Duration::from_millis(400),
            control_interval: Duration::from_millis(10),
            join_timeout: Duration::from_secs(2),
        };
        let modulator =
            StressModulator::start(&settings, Arc::clone(&pool), Arc::clone(&os) as Arc<dyn OsControl>)
                .unwrap();
        thread::sleep(Duration::from_millis(500));
        let begin = Instant::now();
        modulator.stop();
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert!(os.count(ProcessSignal::Suspend) > 0);
    }
}
