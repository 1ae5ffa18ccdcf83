// SPDX-License-Identifier: MIT
// apartment-demo: exercise thread-affine dispatchers from the command line
//
// - Runs one scenario against a Dispatcher, IndexedDispatcher or TaskResetEvent.
// - Prints a JSON report of what was executed, where, and in which order.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;

use apartment::DispatcherOptions;
use clap::Parser;
use log::info;

pub mod global_config;
pub mod scenarios;

use crate::global_config::{GlobalConfig, Scenario};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Scenario to run
    #[arg(long, value_enum, default_value_t)]
    scenario: Scenario,

    /// Number of work items
    #[arg(long, default_value_t = 1000)]
    items: usize,

    /// Number of producer threads submitting work
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Dispatcher options (JSON file, e.g. {"thread-name": "ui", "stack-size": 1048576})
    #[arg(long, value_name = "JSON")]
    options: Option<PathBuf>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.items == 0 {
        return Err("--items must be at least 1".into());
    }
    if args.producers == 0 {
        return Err("--producers must be at least 1".into());
    }
    if args.producers > args.items {
        return Err(format!(
            "--producers ({}) must not exceed --items ({})",
            args.producers, args.items
        ));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let options: DispatcherOptions = match &args.options {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => DispatcherOptions::default(),
    };

    global_config::initialize_global_config(GlobalConfig {
        scenario: args.scenario,
        items: args.items,
        producers: args.producers,
        options,
    })?;

    let config = global_config::get_config();
    info!("Running scenario {:?}", config.scenario);
    let report = scenarios::run(config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.passed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: usize, producers: usize) -> Args {
        Args {
            scenario: Scenario::Fifo,
            items,
            producers,
            options: None,
        }
    }

    #[test]
    fn argument_validation() {
        assert!(validate_args(&args(10, 2)).is_ok());
        assert!(validate_args(&args(0, 1)).is_err());
        assert!(validate_args(&args(10, 0)).is_err());
        assert!(validate_args(&args(2, 3)).is_err());
    }

    #[test]
    fn cli_parses_scenarios() {
        let parsed = Args::try_parse_from([
            "apartment-demo",
            "--scenario",
            "indexed",
            "--items",
            "8",
        ])
        .unwrap();
        assert_eq!(parsed.scenario, Scenario::Indexed);
        assert_eq!(parsed.items, 8);
        assert_eq!(parsed.producers, 4);
    }
}
