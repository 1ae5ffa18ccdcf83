// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

/// Settings for the worker thread a dispatcher spawns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DispatcherOptions {
    /// Name of the worker thread. Defaults to `apartment-<owner>`.
    pub thread_name: Option<String>,
    /// Stack size of the worker thread in bytes. Defaults to the std default.
    pub stack_size: Option<usize>,
}

impl DispatcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub(crate) fn thread_builder(&self, owner: &str) -> std::thread::Builder {
        let name = self
            .thread_name
            .clone()
            .unwrap_or_else(|| format!("apartment-{owner}"));
        let builder = std::thread::Builder::new().name(name);
        match self.stack_size {
            Some(bytes) => builder.stack_size(bytes),
            None => builder,
        }
    }
}
