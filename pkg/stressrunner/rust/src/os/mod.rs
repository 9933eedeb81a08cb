// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Platform process control.
//!
//! One [`OsControl`] implementation is picked at startup by [`for_platform`]
//! and shared by the command distribution, the workers and the coordinator.

mod linux;
mod svos;
mod windows;

pub use linux::LinuxControl;
pub use svos::SvosControl;
pub use windows::WindowsControl;

use crate::errors::{Error, Result};
use crate::worker::WorkerHandle;
use log::info;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

const SVOS_MARKER: &str = "/etc/svos";

/// Signals the runner sends to instances, independent of the platform encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    Suspend,
    Continue,
    Kill,
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSignal::Interrupt => write!(f, "interrupt"),
            ProcessSignal::Terminate => write!(f, "terminate"),
            ProcessSignal::Suspend => write!(f, "suspend"),
            ProcessSignal::Continue => write!(f, "continue"),
            ProcessSignal::Kill => write!(f, "kill"),
        }
    }
}

/// Process control primitives of one platform.
///
/// `halt_thread` and `resume_thread` read and then update the handle's halted
/// flag; callers must hold the pool's transition lock.
pub trait OsControl: Send + Sync {
    fn platform_name(&self) -> &'static str;

    fn is_unix(&self) -> bool;

    /// Signal used to ask an instance to stop and report its results.
    fn safe_signal(&self) -> ProcessSignal {
        ProcessSignal::Interrupt
    }

    /// Platform specific process creation settings.
    fn configure_spawn(&self, cmd: &mut Command);

    /// Command prefix that applies a 0-100 priority.
    fn set_priority(&self, priority: u8) -> Vec<String>;

    /// Wrap `command` so it runs with `priority` pinned to execution unit `unit`.
    fn generate_os_command(&self, unit: u32, priority: u8, command: &[String]) -> Vec<String>;

    /// Like [`OsControl::generate_os_command`], additionally binding the
    /// instance's memory to NUMA node `node`.
    fn generate_numa_command(
        &self,
        _unit: u32,
        _node: u32,
        _priority: u8,
        _command: &[String],
    ) -> Result<Vec<String>> {
        Err(Error::UnsupportedPlatform(format!(
            "NUMA binding on {}",
            self.platform_name()
        )))
    }

    fn safe_kill(&self, worker: &WorkerHandle, signal: ProcessSignal) -> Result<()>;

    fn halt_thread(&self, worker: &WorkerHandle) -> Result<()>;

    fn resume_thread(&self, worker: &WorkerHandle) -> Result<()>;

    /// Forcefully end an instance that did not honor the safe signal.
    fn stop_thread(&self, worker: &WorkerHandle) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Auto,
    Linux,
    Svos,
    Windows,
}

impl Platform {
    /// Resolve `Auto` to the platform of the running host.
    pub fn resolve(self) -> Result<Platform> {
        if self != Platform::Auto {
            return Ok(self);
        }
        match std::env::consts::OS {
            "windows" => Ok(Platform::Windows),
            "linux" if Path::new(SVOS_MARKER).exists() => Ok(Platform::Svos),
            "linux" => Ok(Platform::Linux),
            other => Err(Error::UnsupportedPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Auto => write!(f, "auto"),
            Platform::Linux => write!(f, "linux"),
            Platform::Svos => write!(f, "svos"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

/// Build the process control implementation for `platform`.
pub fn for_platform(platform: Platform) -> Result<Arc<dyn OsControl>> {
    let resolved = platform.resolve()?;
    let control: Arc<dyn OsControl> = match resolved {
        Platform::Linux => Arc::new(LinuxControl::new()),
        Platform::Svos => Arc::new(SvosControl::new()),
        Platform::Windows => Arc::new(WindowsControl::new()),
        Platform::Auto => return Err(Error::UnsupportedPlatform(resolved.to_string())),
    };
    info!("using {} process control", control.platform_name());
    Ok(control)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_explicit_platform() {
        assert_eq!(Platform::Svos.resolve().unwrap(), Platform::Svos);
        assert_eq!(Platform::Windows.resolve().unwrap(), Platform::Windows);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolve_auto_on_linux() {
        let resolved = Platform::Auto.resolve().unwrap();
        assert!(matches!(resolved, Platform::Linux | Platform::Svos));
    }

    #[test]
    fn test_for_platform_names() {
        assert_eq!(for_platform(Platform::Linux).unwrap().platform_name(), "linux");
        assert_eq!(for_platform(Platform::Svos).unwrap().platform_name(), "svos");
        assert_eq!(
            for_platform(Platform::Windows).unwrap().platform_name(),
            "windows"
        );
    }

    #[test]
    fn test_platform_deserialize() {
        let p: Platform = serde_yaml::from_str("svos").unwrap();
        assert_eq!(p, Platform::Svos);
        assert!(serde_yaml::from_str::<Platform>("beos").is_err());
    }
}
