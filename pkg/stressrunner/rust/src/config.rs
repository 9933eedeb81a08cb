// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::coordinator::ExecutionSettings;
use crate::distribution::CommandTemplate;
use crate::os::Platform;
use crate::policy::SchedulingPolicy;
use crate::stress::StressSettings;
use crate::units::{ExecutionUnit, LpuSpec};
use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/datadog-agent/stress-runner.yaml";
pub const CONFIG_PATH_ENV: &str = "DD_STRESS_RUNNER_CONFIG";

fn default_priority() -> u8 {
    50
}

fn default_pid_wait_timeout_secs() -> u64 {
    60
}

fn default_stop_grace_secs() -> u64 {
    5
}

fn default_period_secs() -> f64 {
    60.0
}

fn default_control_interval_secs() -> f64 {
    0.25
}

fn default_join_timeout_secs() -> f64 {
    5.0
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Validation tool executable.
    pub binary: String,
    /// Tool arguments; `{test_case}` and `{unit}` are substituted per instance.
    #[serde(default)]
    pub args: Vec<String>,
    pub test_cases: Vec<String>,
    /// Logical CPUs to pin instances to, as a list or a range string such as
    /// `"0,2,4-7"`. Unset or empty means every available CPU.
    #[serde(default)]
    pub execution_units: Option<LpuSpec>,
    /// NUMA node to the logical CPUs whose instances allocate from it.
    /// Replaces `execution_units`.
    #[serde(default)]
    pub numa: BTreeMap<u32, LpuSpec>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub policy: SchedulingPolicy,
    /// 0 disables the time limit.
    #[serde(default)]
    pub timeout_minutes: u64,
    #[serde(default)]
    pub stop_on_error: bool,
    #[serde(default = "default_pid_wait_timeout_secs")]
    pub pid_wait_timeout_secs: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub stress: StressConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct StressConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_period_secs")]
    pub period_secs: f64,
    #[serde(default = "default_control_interval_secs")]
    pub control_interval_secs: f64,
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: f64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: default_period_secs(),
            control_interval_secs: default_control_interval_secs(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl StressConfig {
    fn settings(&self) -> Result<Option<StressSettings>> {
        if !self.enabled {
            return Ok(None);
        }
        Ok(Some(StressSettings {
            period: seconds("stress.period_secs", self.period_secs)?,
            control_interval: seconds("stress.control_interval_secs", self.control_interval_secs)?,
            join_timeout: seconds("stress.join_timeout_secs", self.join_timeout_secs)?,
        }))
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    if value <= 0.0 {
        bail!("{field} must be positive, got {value}");
    }
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {field}: {value}"))
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            bail!("binary must not be empty");
        }
        if self.test_cases.is_empty() {
            bail!("at least one test case is required");
        }
        if self.priority > 100 {
            bail!("priority must be within 0-100, got {}", self.priority);
        }
        if self.pid_wait_timeout_secs == 0 {
            bail!("pid_wait_timeout_secs must be positive");
        }
        if !self.numa.is_empty() && self.execution_units.is_some() {
            bail!("execution_units and numa cannot be used together");
        }
        self.units()?;
        self.stress.settings()?;
        Ok(())
    }

    pub fn template(&self) -> CommandTemplate {
        CommandTemplate::new(self.binary.clone(), self.args.clone())
    }

    /// Configured execution units: the NUMA layout when one is given, else
    /// the listed CPUs, else every logical CPU of the host.
    pub fn units(&self) -> Result<Vec<ExecutionUnit>> {
        if !self.numa.is_empty() {
            let mut units = Vec::new();
            for (&node, spec) in &self.numa {
                let lpus = spec
                    .expand()
                    .with_context(|| format!("numa node {node}"))?;
                if lpus.is_empty() {
                    bail!("numa node {node} has no execution units");
                }
                units.extend(lpus.into_iter().map(|lpu| ExecutionUnit::on_node(lpu, node)));
            }
            return Ok(units);
        }

        let lpus = match &self.execution_units {
            Some(spec) => spec.expand().context("execution_units")?,
            None => Vec::new(),
        };
        if !lpus.is_empty() {
            return Ok(lpus.into_iter().map(ExecutionUnit::new).collect());
        }
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Ok((0..u32::try_from(cpus).unwrap_or(u32::MAX))
            .map(ExecutionUnit::new)
            .collect())
    }

    /// Log the execution unit layout the run will use.
    pub fn log_layout(&self, units: &[ExecutionUnit]) {
        if self.numa.is_empty() {
            info!("execution units: {}", join_lpus(units.iter()));
            return;
        }
        for &node in self.numa.keys() {
            let on_node = units.iter().filter(|u| u.numa_node == Some(node));
            info!("numa node {node}: execution units {}", join_lpus(on_node));
        }
    }

    pub fn execution_settings(&self) -> Result<ExecutionSettings> {
        Ok(ExecutionSettings {
            policy: self.policy,
            execution_units: self.units()?.len(),
            timeout: (self.timeout_minutes > 0)
                .then(|| Duration::from_secs(self.timeout_minutes.saturating_mul(60))),
            stop_on_error: self.stop_on_error,
            pid_wait_timeout: Duration::from_secs(self.pid_wait_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            stress: self.stress.settings()?,
        })
    }
}

fn join_lpus<'a>(units: impl Iterator<Item = &'a ExecutionUnit>) -> String {
    units
        .map(|u| u.lpu.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Config file path: explicit flag, then `DD_STRESS_RUNNER_CONFIG`, then the
/// agent's config directory.
pub fn config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> Result<RunConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: RunConfig =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    debug!("loaded run configuration from {}", path.display());
    Ok(config)
}
