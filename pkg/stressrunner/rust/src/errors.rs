// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no commands to execute")]
    NoCommands,
    #[error("no execution units configured")]
    NoExecutionUnits,
    #[error("no test cases configured")]
    NoTestCases,
    #[error("invalid execution units: {0}")]
    InvalidExecutionUnits(String),
    #[error("execution has already been started on this coordinator")]
    AlreadyStarted,
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("worker {0} has no running process")]
    NoProcess(String),
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start worker thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install signal handlers: {0}")]
    SignalInstall(#[source] std::io::Error),
}

impl Error {
    /// Structural problems detected before any process is spawned.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::NoCommands
                | Error::NoExecutionUnits
                | Error::NoTestCases
                | Error::InvalidExecutionUnits(_)
                | Error::AlreadyStarted
                | Error::UnsupportedPlatform(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(Error::NoCommands.is_configuration());
        assert!(Error::NoExecutionUnits.is_configuration());
        assert!(Error::UnsupportedPlatform("beos".into()).is_configuration());
        assert!(!Error::NoProcess("worker-0".into()).is_configuration());
    }

    #[test]
    fn test_signal_error_message() {
        let err = Error::Signal {
            pid: 42,
            source: std::io::Error::from_raw_os_error(3),
        };
        assert!(err.to_string().starts_with("failed to signal pid 42"));
    }
}
