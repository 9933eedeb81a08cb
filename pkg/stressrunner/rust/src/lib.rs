// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod distribution;
pub mod errors;
pub mod exit_code;
pub mod os;
pub mod policy;
pub mod signal_bus;
pub mod state;
pub mod stress;
pub mod units;
pub mod worker;

pub use coordinator::{ExecutionCoordinator, ExecutionSettings, RunOutcome};
pub use distribution::{CommandDistribution, CommandTemplate};
pub use errors::{Error, Result};
pub use os::{OsControl, Platform, for_platform};
pub use policy::SchedulingPolicy;
pub use signal_bus::SignalBus;
pub use stress::StressSettings;
pub use units::{ExecutionUnit, LpuSpec};
pub use worker::{InstanceCommand, ResultRecord};
