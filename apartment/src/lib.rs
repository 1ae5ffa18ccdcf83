// SPDX-License-Identifier: MIT
// apartment: thread-affine task dispatchers
//
// - A Dispatcher gives a subsystem its own serialized execution context,
//   backed by one dedicated thread.
// - Work is queued from any thread and executed strictly one at a time.
// - IndexedDispatcher executes by caller-assigned sequence number instead.
// - TaskResetEvent builds named one-shot events purely on confinement.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod indexed_dispatcher;
pub mod job_engine;
pub mod sync;

pub use crate::config::DispatcherOptions;
pub use crate::dispatcher::{Dispatcher, DispatcherOperation, DispatcherState};
pub use crate::error::{DispatcherError, Result};
pub use crate::indexed_dispatcher::IndexedDispatcher;
pub use crate::sync::confined::Confined;
pub use crate::sync::task_reset_event::TaskResetEvent;
