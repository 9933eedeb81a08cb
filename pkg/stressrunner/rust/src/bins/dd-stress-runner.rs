// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_stress_runner::aggregate::summarize;
use dd_stress_runner::config::{config_path, load_config};
use dd_stress_runner::exit_code::{self, RUNNER_TOOL_FAILED};
use dd_stress_runner::{
    CommandDistribution, ExecutionCoordinator, SchedulingPolicy, SignalBus, for_platform,
};
use log::{Level, LevelFilter, error, info, warn};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dd-stress-runner")]
#[command(about = "Runs a validation tool concurrently across execution units", long_about = None)]
struct Args {
    /// Run configuration file (defaults to $DD_STRESS_RUNNER_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured scheduling policy (queue or batch)
    #[arg(long)]
    policy: Option<SchedulingPolicy>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<Level>,

    /// Log the generated commands and exit without running them
    #[arg(long)]
    dry_run: bool,
}

#[allow(clippy::print_stderr)]
fn main() {
    let args = Args::parse();

    // Everything is let through the logger; the max level does the filtering
    // so it can be raised once the configuration is known.
    if let Err(e) = SimpleLogger::new().with_level(LevelFilter::Trace).init() {
        eprintln!("failed to initialise logging: {e}");
    }
    log::set_max_level(args.log_level.unwrap_or(Level::Info).to_level_filter());

    let code = match run(&args) {
        Ok(status) => exit_code::process_exit_code(status),
        Err(e) => {
            error!("{e:#}");
            RUNNER_TOOL_FAILED
        }
    };
    std::process::exit(code);
}

fn run(args: &Args) -> Result<i32> {
    let path = config_path(args.config.as_deref());
    let config = load_config(&path)?;
    if args.log_level.is_none() {
        let level: Level = config
            .log_level
            .parse()
            .with_context(|| format!("invalid log_level: {}", config.log_level))?;
        log::set_max_level(level.to_level_filter());
    }
    info!(
        "dd-stress-runner starting (version {}, config {})",
        env!("CARGO_PKG_VERSION"),
        path.display()
    );

    let mut settings = config.execution_settings()?;
    if let Some(policy) = args.policy {
        settings.policy = policy;
    }

    let os = for_platform(config.platform)?;
    let units = config.units()?;
    config.log_layout(&units);
    let distribution = CommandDistribution::new(
        config.template(),
        config.test_cases.clone(),
        units,
        config.priority,
        Arc::clone(&os),
    );
    let commands = distribution.generate_commands()?;

    if args.dry_run {
        for command in &commands {
            info!("{command}");
        }
        return Ok(exit_code::OK);
    }

    let bus = SignalBus::new();
    bus.install()?;
    let coordinator = ExecutionCoordinator::new(settings, os, &bus);
    let outcome = coordinator.execute_instances(commands)?;

    let status = summarize(&outcome.records);
    if outcome.time_limit_reached {
        warn!("run ended by its time limit");
    }
    info!("dd-stress-runner exiting with status {status}");
    Ok(status)
}
