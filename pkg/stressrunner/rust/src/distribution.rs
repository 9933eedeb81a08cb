// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::os::OsControl;
use crate::units::ExecutionUnit;
use crate::worker::InstanceCommand;
use log::{debug, info};
use std::sync::Arc;

const TEST_CASE_PLACEHOLDER: &str = "{test_case}";
const UNIT_PLACEHOLDER: &str = "{unit}";

/// Validation tool invocation with `{test_case}` and `{unit}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub binary: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }

    pub fn render(&self, test_case: &str, unit: u32) -> Vec<String> {
        let unit = unit.to_string();
        std::iter::once(self.binary.clone())
            .chain(self.args.iter().map(|arg| {
                arg.replace(TEST_CASE_PLACEHOLDER, test_case)
                    .replace(UNIT_PLACEHOLDER, &unit)
            }))
            .collect()
    }
}

/// Expands a template into one command per (test case, execution unit) pair.
pub struct CommandDistribution {
    template: CommandTemplate,
    test_cases: Vec<String>,
    units: Vec<ExecutionUnit>,
    priority: u8,
    os: Arc<dyn OsControl>,
}

impl CommandDistribution {
    pub fn new(
        template: CommandTemplate,
        test_cases: Vec<String>,
        units: Vec<ExecutionUnit>,
        priority: u8,
        os: Arc<dyn OsControl>,
    ) -> Self {
        Self {
            template,
            test_cases,
            units,
            priority,
            os,
        }
    }

    /// The shorter of test cases and units is reused round-robin until both
    /// sides are covered. Units with a NUMA node get their memory bound to it.
    pub fn generate_commands(&self) -> Result<Vec<InstanceCommand>> {
        if self.test_cases.is_empty() {
            return Err(Error::NoTestCases);
        }
        if self.units.is_empty() {
            return Err(Error::NoExecutionUnits);
        }

        let count = self.test_cases.len().max(self.units.len());
        let commands = self
            .test_cases
            .iter()
            .cycle()
            .zip(self.units.iter().cycle())
            .take(count)
            .map(|(test_case, unit)| -> Result<InstanceCommand> {
                let argv = self.template.render(test_case, unit.lpu);
                debug!("unit {unit}: {test_case}");
                let argv = match unit.numa_node {
                    Some(node) => {
                        self.os
                            .generate_numa_command(unit.lpu, node, self.priority, &argv)?
                    }
                    None => self.os.generate_os_command(unit.lpu, self.priority, &argv),
                };
                Ok(InstanceCommand::new(argv))
            })
            .collect::<Result<Vec<InstanceCommand>>>()?;

        info!(
            "generated {} commands for {} test cases on {} execution units",
            commands.len(),
            self.test_cases.len(),
            self.units.len()
        );
        Ok(commands)
    }
}
