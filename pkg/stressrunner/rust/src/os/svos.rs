// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{LinuxControl, OsControl, ProcessSignal};
use crate::errors::Result;
use crate::worker::WorkerHandle;
use std::process::Command;

/// SVOS hosts behave like Linux; only the reported platform differs.
#[derive(Debug, Default)]
pub struct SvosControl {
    inner: LinuxControl,
}

impl SvosControl {
    pub fn new() -> Self {
        Self {
            inner: LinuxControl::new(),
        }
    }
}

impl OsControl for SvosControl {
    fn platform_name(&self) -> &'static str {
        "svos"
    }

    fn is_unix(&self) -> bool {
        self.inner.is_unix()
    }

    fn configure_spawn(&self, cmd: &mut Command) {
        self.inner.configure_spawn(cmd)
    }

    fn set_priority(&self, priority: u8) -> Vec<String> {
        self.inner.set_priority(priority)
    }

    fn generate_os_command(&self, unit: u32, priority: u8, command: &[String]) -> Vec<String> {
        self.inner.generate_os_command(unit, priority, command)
    }

    fn generate_numa_command(
        &self,
        unit: u32,
        node: u32,
        priority: u8,
        command: &[String],
    ) -> Result<Vec<String>> {
        self.inner.generate_numa_command(unit, node, priority, command)
    }

    fn safe_kill(&self, worker: &WorkerHandle, signal: ProcessSignal) -> Result<()> {
        self.inner.safe_kill(worker, signal)
    }

    fn halt_thread(&self, worker: &WorkerHandle) -> Result<()> {
        self.inner.halt_thread(worker)
    }

    fn resume_thread(&self, worker: &WorkerHandle) -> Result<()> {
        self.inner.resume_thread(worker)
    }

    fn stop_thread(&self, worker: &WorkerHandle) -> Result<()> {
        self.inner.stop_thread(worker)
    }
}
