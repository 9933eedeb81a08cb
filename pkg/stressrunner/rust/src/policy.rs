// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Scheduling policies: how commands are mapped onto workers over time.

use crate::worker::{
    CommandSource, InstanceCommand, PidNotice, WorkerContext, WorkerPool, spawn_worker,
};
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::time::{Duration, Instant};

const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SchedulingPolicy {
    /// One worker per execution unit pulling from a shared FIFO.
    #[default]
    #[serde(rename = "queue", alias = "continuous_queue")]
    ContinuousQueue,
    /// Consecutive batches of one command per execution unit.
    #[serde(rename = "batch", alias = "fixed_batch")]
    FixedBatch,
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" | "continuous_queue" => Ok(SchedulingPolicy::ContinuousQueue),
            "batch" | "fixed_batch" => Ok(SchedulingPolicy::FixedBatch),
            other => Err(format!("unknown scheduling policy: {other}")),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingPolicy::ContinuousQueue => write!(f, "queue"),
            SchedulingPolicy::FixedBatch => write!(f, "batch"),
        }
    }
}

/// Command index ranges of the batches for `commands` commands on `units`
/// execution units.
pub fn batch_ranges(commands: usize, units: usize) -> Vec<Range<usize>> {
    if units == 0 {
        return Vec::new();
    }
    (0..commands.div_ceil(units))
        .map(|k| k * units..((k + 1) * units).min(commands))
        .collect()
}

/// Everything a policy needs to start workers for one run.
pub(crate) struct Dispatcher<'a> {
    pub pool: &'a WorkerPool,
    pub ctx: &'a WorkerContext,
    pub pids: &'a Receiver<PidNotice>,
    pub units: usize,
    pub pid_wait_timeout: Duration,
}

impl SchedulingPolicy {
    pub(crate) fn dispatch(self, commands: Vec<InstanceCommand>, dispatcher: &Dispatcher<'_>) {
        match self {
            SchedulingPolicy::ContinuousQueue => dispatcher.run_queue(commands),
            SchedulingPolicy::FixedBatch => dispatcher.run_batches(commands),
        }
    }
}

impl Dispatcher<'_> {
    fn run_queue(&self, commands: Vec<InstanceCommand>) {
        let (tx, rx) = crossbeam_channel::bounded(commands.len());
        for command in commands {
            if tx.send(command).is_err() {
                error!("command queue closed while loading");
                return;
            }
        }
        // Spare units would find the queue empty and never publish a pid.
        let workers = self.units.min(rx.len());
        drop(tx);

        info!("starting {workers} queue workers for {} commands", rx.len());
        let started: Vec<String> = (0..workers)
            .filter_map(|i| {
                let source = CommandSource::Queue {
                    queue: rx.clone(),
                    stopping: self.pool.stopping().clone(),
                };
                self.start(format!("worker-{i}"), source)
            })
            .collect();
        self.await_starts(&started);
    }

    fn run_batches(&self, commands: Vec<InstanceCommand>) {
        let ranges = batch_ranges(commands.len(), self.units);
        let total = ranges.len();
        let mut commands = commands.into_iter();

        for (k, range) in ranges.into_iter().enumerate() {
            if self.pool.is_stopping() {
                warn!("stop requested, skipping the remaining {} batches", total - k);
                return;
            }
            if k > 0 {
                self.pool.retire_current(self.ctx.os.as_ref());
            }
            info!(
                "starting batch {}/{total} (commands {}..{})",
                k + 1,
                range.start,
                range.end
            );
            let started: Vec<String> = range
                .zip(commands.by_ref())
                .filter_map(|(idx, command)| {
                    self.start(format!("worker-{idx}"), CommandSource::Single(command))
                })
                .collect();
            self.await_starts(&started);
        }
    }

    fn start(&self, name: String, source: CommandSource) -> Option<String> {
        match spawn_worker(name.clone(), source, self.ctx.clone()) {
            Ok(worker) => {
                self.pool.add(worker);
                Some(name)
            }
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    /// Wait for each worker to publish its first pid. A worker that exits
    /// without one, or stays silent past the timeout, is a start failure.
    fn await_starts(&self, names: &[String]) {
        let mut acked: HashSet<String> = HashSet::new();
        for name in names {
            let deadline = Instant::now() + self.pid_wait_timeout;
            loop {
                let alive = self.pool.is_alive(name);
                for notice in self.pids.try_iter() {
                    self.ack(&mut acked, notice);
                }
                if acked.contains(name) {
                    break;
                }
                if self.pool.is_stopping() {
                    debug!("[{name}] stop requested before the start was acknowledged");
                    break;
                }
                if !alive {
                    error!("[{name}] failed to start: exited without running its command");
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    error!(
                        "[{name}] failed to start: no pid within {}s",
                        self.pid_wait_timeout.as_secs()
                    );
                    break;
                }
                if let Ok(notice) = self.pids.recv_timeout((deadline - now).min(ACK_POLL_INTERVAL)) {
                    self.ack(&mut acked, notice);
                }
            }
        }
    }

    fn ack(&self, acked: &mut HashSet<String>, notice: PidNotice) {
        info!("[{}] started (pid={})", notice.worker, notice.pid);
        acked.insert(notice.worker);
    }
}
