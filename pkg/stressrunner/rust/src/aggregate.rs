// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::exit_code::{self, FORCED_KILL, OK};
use crate::worker::ResultRecord;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Reduce exit codes to one run status.
///
/// Signal terminations (negative) outrank tool failures (positive); within
/// the same sign the most extreme code wins.
pub fn reduce_exit_codes<I>(codes: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    codes
        .into_iter()
        .filter(|&code| code != OK)
        .max_by_key(|&code| (code < 0, code.unsigned_abs()))
        .unwrap_or(OK)
}

/// Instances that had to be killed after ignoring the stop request, keyed by
/// worker name and pid.
#[derive(Debug, Default)]
pub struct ForcedKills {
    kills: Mutex<HashSet<(String, u32)>>,
}

impl ForcedKills {
    fn kills(&self) -> MutexGuard<'_, HashSet<(String, u32)>> {
        self.kills.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, worker: &str, pid: u32) {
        self.kills().insert((worker.to_string(), pid));
    }

    pub fn remove(&self, worker: &str, pid: u32) {
        self.kills().remove(&(worker.to_string(), pid));
    }

    pub fn contains(&self, worker: &str, pid: u32) -> bool {
        self.kills().contains(&(worker.to_string(), pid))
    }

    /// Replace the raw status of every forcibly killed instance.
    ///
    /// A kill always hits the last process of its worker, so only the latest
    /// matching record is rewritten. An earlier record whose pid was later
    /// reused keeps its own status.
    pub fn apply(&self, records: &mut [ResultRecord]) {
        let kills = self.kills();
        for (worker, pid) in kills.iter() {
            let Some(record) = records
                .iter_mut()
                .rev()
                .find(|r| r.pid == *pid && r.worker == *worker)
            else {
                continue;
            };
            debug!(
                "[{worker}] PID-{pid}: raw exit code {} replaced, instance was forcibly killed",
                record.exit_code
            );
            record.exit_code = FORCED_KILL;
        }
    }
}

pub fn summary_line(record: &ResultRecord) -> String {
    format!(
        "PID-{}: {}, exit code: {} ({})",
        record.pid,
        if record.is_ok() { "PASS" } else { "FAIL" },
        exit_code::describe(record.exit_code),
        record.exit_code
    )
}

/// Log the outcome of every instance and return the run status.
pub fn summarize(records: &[ResultRecord]) -> i32 {
    for record in records {
        for line in &record.stdout {
            debug!("PID-{}: {line}", record.pid);
        }
        for line in &record.stderr {
            error!("PID-{}: {line}", record.pid);
        }
        if record.is_ok() {
            info!("{}", summary_line(record));
        } else {
            warn!("{}", summary_line(record));
        }
    }

    let status = reduce_exit_codes(records.iter().map(|r| r.exit_code));
    info!(
        "{} instances, run status: {} ({status})",
        records.len(),
        exit_code::describe(status)
    );
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32, exit_code: i32) -> ResultRecord {
        worker_record("worker-0", pid, exit_code)
    }

    fn worker_record(worker: &str, pid: u32, exit_code: i32) -> ResultRecord {
        ResultRecord {
            worker: worker.to_string(),
            pid,
            stdout: vec![],
            stderr: vec![],
            exit_code,
        }
    }

    #[test]
    fn test_reduce_exit_codes() {
        assert_eq!(reduce_exit_codes([OK, OK]), OK);
        assert_eq!(reduce_exit_codes([OK, 5]), 5);
        assert_eq!(reduce_exit_codes([5, -2]), -2);
        assert_eq!(reduce_exit_codes([-2, -9]), -9);
        assert_eq!(reduce_exit_codes(Vec::<i32>::new()), OK);
    }

    #[test]
    fn test_reduce_is_order_independent() {
        assert_eq!(reduce_exit_codes([-2, 30, 1]), -2);
        assert_eq!(reduce_exit_codes([1, 30, -2]), -2);
        assert_eq!(reduce_exit_codes([3, 27, 1]), 27);
    }

    #[test]
    fn test_forced_kills_override() {
        let forced = ForcedKills::default();
        forced.insert("worker-0", 11);
        forced.insert("worker-0", 12);
        forced.remove("worker-0", 12);
        let mut records = vec![record(11, -9), record(12, -2), record(13, 0)];
        forced.apply(&mut records);

        let codes: Vec<i32> = records.iter().map(|r| r.exit_code).collect();
        assert_eq!(codes, vec![FORCED_KILL, -2, 0]);
        assert!(forced.contains("worker-0", 11));
        assert!(!forced.contains("worker-0", 12));
    }

    #[test]
    fn test_forced_kill_ignores_reused_pids() {
        let forced = ForcedKills::default();
        forced.insert("worker-1", 300);
        let mut records = vec![
            // Same pid, earlier process of the same worker.
            worker_record("worker-1", 300, 0),
            // Same pid, another worker.
            worker_record("worker-0", 300, 4),
            worker_record("worker-1", 301, 0),
            worker_record("worker-1", 300, -9),
        ];
        forced.apply(&mut records);

        let codes: Vec<i32> = records.iter().map(|r| r.exit_code).collect();
        assert_eq!(codes, vec![0, 4, 0, FORCED_KILL]);
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line(&record(7, 0)), "PID-7: PASS, exit code: OK (0)");
        assert_eq!(
            summary_line(&record(8, 1)),
            "PID-8: FAIL, exit code: FLOW_DATA_MISMATCH_ERROR (1)"
        );
    }

    #[test]
    fn test_summarize_returns_status() {
        assert_eq!(summarize(&[record(1, 0), record(2, FORCED_KILL)]), FORCED_KILL);
        assert_eq!(summarize(&[]), OK);
    }
}
