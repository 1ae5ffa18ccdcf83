// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::io;

use thiserror::Error;

/// Errors surfaced by dispatchers and the primitives built on them.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// The dispatcher no longer accepts work because disposal has begun.
    #[error("operation cancelled: the dispatcher is shutting down")]
    OperationCancelled,

    /// A thread-affine operation was attempted from a foreign thread.
    #[error("illegal cross-thread access: only the thread of dispatcher '{owner}' may do this")]
    IllegalCrossThreadAccess { owner: String },

    /// `dispose` or `dispose_async` was called a second time.
    #[error("the dispatcher has already been disposed")]
    AlreadyDisposed,

    /// The submitted work item panicked on the dispatcher thread.
    #[error("work item panicked: {message}")]
    WorkItemPanicked { message: String },

    #[error("index {index} has already been consumed (next expected index is {next})")]
    IndexAlreadyConsumed { index: i64, next: i64 },

    /// The highest index is reserved for the shutdown sentinel.
    #[error("index {index} is out of range")]
    IndexOutOfRange { index: i64 },

    #[error("index {index} has already been submitted")]
    DuplicateIndex { index: i64 },

    /// Blocking on the dispatcher's own thread would never return.
    #[error("blocking invoke from the dispatcher's own thread would deadlock")]
    WouldDeadlock,

    /// Confined state was accessed again while an outer access was still active.
    #[error("confined state of dispatcher '{owner}' is already being accessed")]
    ReentrantAccess { owner: String },

    #[error("a dispatcher needs a non-empty owner label")]
    InvalidOwner,

    #[error("failed to spawn the dispatcher thread: {0}")]
    Spawn(#[from] io::Error),
}

impl DispatcherError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        DispatcherError::WorkItemPanicked { message }
    }

    /// True for the errors caused by shutdown rather than by the caller.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            DispatcherError::OperationCancelled | DispatcherError::AlreadyDisposed
        )
    }
}

pub type Result<T, E = DispatcherError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let err = DispatcherError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "work item panicked: boom");

        let err = DispatcherError::from_panic(Box::new(String::from("owned boom")));
        assert!(matches!(err, DispatcherError::WorkItemPanicked { message } if message == "owned boom"));

        let err = DispatcherError::from_panic(Box::new(42u32));
        assert!(matches!(err, DispatcherError::WorkItemPanicked { message } if message == "unknown panic payload"));
    }

    #[test]
    fn cancellation_kinds() {
        assert!(DispatcherError::OperationCancelled.is_cancellation());
        assert!(DispatcherError::AlreadyDisposed.is_cancellation());
        assert!(!DispatcherError::WouldDeadlock.is_cancellation());
    }
}
