// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Execution units: the logical CPUs instances are pinned to, optionally tied
//! to a NUMA node whose memory they must use.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

/// One logical CPU slot. At most one instance runs on it at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionUnit {
    pub lpu: u32,
    /// Memory of the instance is bound to this node when set.
    pub numa_node: Option<u32>,
}

impl ExecutionUnit {
    pub fn new(lpu: u32) -> Self {
        Self {
            lpu,
            numa_node: None,
        }
    }

    pub fn on_node(lpu: u32, node: u32) -> Self {
        Self {
            lpu,
            numa_node: Some(node),
        }
    }
}

impl From<u32> for ExecutionUnit {
    fn from(lpu: u32) -> Self {
        Self::new(lpu)
    }
}

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.numa_node {
            Some(node) => write!(f, "{} (node {node})", self.lpu),
            None => write!(f, "{}", self.lpu),
        }
    }
}

/// Logical CPU list as written in a configuration: either a YAML list or a
/// range string such as `"0,2,4-7"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LpuSpec {
    List(Vec<u32>),
    Ranges(String),
}

impl LpuSpec {
    /// Sorted, duplicate-free CPU numbers.
    pub fn expand(&self) -> Result<Vec<u32>> {
        match self {
            LpuSpec::List(lpus) => Ok(lpus
                .iter()
                .copied()
                .collect::<BTreeSet<u32>>()
                .into_iter()
                .collect()),
            LpuSpec::Ranges(spec) => expand_lpu_string(spec),
        }
    }
}

/// Expand a comma separated CPU list. Each entry is a CPU number or an
/// inclusive range written `a-b` or `a:b`; blanks are ignored.
///
/// `"1,2,3:5,6-12"` expands to `1..=12`.
pub fn expand_lpu_string(spec: &str) -> Result<Vec<u32>> {
    let compact: String = spec.chars().filter(|c| !c.is_whitespace()).collect();
    let mut lpus = BTreeSet::new();
    for entry in compact.split(',').filter(|e| !e.is_empty()) {
        match entry.split_once(['-', ':']) {
            Some((start, end)) => {
                let start = parse_lpu(entry, start)?;
                let end = parse_lpu(entry, end)?;
                if start > end {
                    return Err(Error::InvalidExecutionUnits(format!(
                        "range {entry} is reversed, did you mean {end}-{start}?"
                    )));
                }
                lpus.extend(start..=end);
            }
            None => {
                lpus.insert(parse_lpu(entry, entry)?);
            }
        }
    }
    Ok(lpus.into_iter().collect())
}

fn parse_lpu(entry: &str, number: &str) -> Result<u32> {
    number
        .parse()
        .map_err(|_| Error::InvalidExecutionUnits(format!("{entry} is not a CPU number or range")))
}
