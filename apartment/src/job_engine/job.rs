// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::panic::{self, AssertUnwindSafe};

use log::{debug, warn};

use crate::error::DispatcherError;

/// A unit of work executed on a dispatcher thread.
pub trait Job: Send + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Runs the job to completion. Always called on the owning thread.
    fn execute(self: Box<Self>);
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("desc", &self.desc()).finish()
    }
}

/// Queue entry type shared by all schedulers.
pub type WorkItem = Box<dyn Job>;

/// Executes a job, containing any panic so the calling loop survives it.
pub fn run_job(job: WorkItem) {
    let desc = job.desc().to_string();
    debug!("Executing job: {}", desc);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || job.execute())) {
        warn!(
            "Job '{}' failed: {}",
            desc,
            DispatcherError::from_panic(payload)
        );
    }
}
