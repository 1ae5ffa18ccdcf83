// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use apartment::DispatcherOptions;
use clap::ValueEnum;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug)]
pub struct GlobalConfig {
    pub scenario: Scenario,
    pub items: usize,
    pub producers: usize,
    pub options: DispatcherOptions,
}

// The actual static variable. It starts empty and is set once in main().
pub static CONFIG: OnceLock<GlobalConfig> = OnceLock::new();

/// The scenario decides which dispatcher is exercised and how.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default, Serialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    #[default]
    /// Default: several producers queue work, execution order is checked per producer
    Fifo,
    /// Sequence numbers are submitted out of order and must execute in order
    Indexed,
    /// Named one-shot events, half signalled before and half after the wait
    Events,
    /// Queue a burst of work and dispose from another thread
    Drain,
    /// Futures that suspend and must resume on the dispatcher thread
    Async,
}

pub fn initialize_global_config(config: GlobalConfig) -> anyhow::Result<()> {
    CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("global config initialized twice"))
}

pub fn get_config<'a>() -> &'a GlobalConfig {
    CONFIG.get().expect("global config not initialized")
}
