// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::borrow::Cow;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use log::debug;

use crate::error::{DispatcherError, Result};
use crate::job_engine::closure_job::ClosureJob;

/// Pending result of a work item submitted to a dispatcher.
///
/// The result is produced on the dispatcher thread and delivered exactly once.
/// If the item is dropped without running (the dispatcher went away) the
/// operation resolves with [`DispatcherError::OperationCancelled`].
#[must_use = "a dispatcher operation does nothing to the caller unless awaited or waited on"]
#[derive(Debug)]
pub struct DispatcherOperation<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> DispatcherOperation<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { rx }
    }

    /// Wraps `f` into a job that reports its return value (or panic) to the
    /// returned operation.
    pub(crate) fn for_closure<F>(
        desc: impl Into<Cow<'static, str>>,
        f: F,
    ) -> (ClosureJob, Self)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = ClosureJob::new(desc, move || {
            let result =
                panic::catch_unwind(AssertUnwindSafe(f)).map_err(DispatcherError::from_panic);
            if tx.send(result).is_err() {
                debug!("Result of a work item dropped, nobody is waiting for it");
            }
        });
        (job, Self::new(rx))
    }

    /// Blocks the calling thread until the dispatcher has executed the item.
    ///
    /// Must not be called on the thread of the dispatcher that runs the item,
    /// nor from inside a `futures` executor.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }

    /// Returns the outcome if the item already ran, without blocking.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(DispatcherError::OperationCancelled)),
        }
    }
}

impl<T> Future for DispatcherOperation<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Poll::Ready(Err(DispatcherError::OperationCancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_engine::job::run_job;

    #[test]
    fn operation_reports_the_return_value() {
        let (job, operation) = DispatcherOperation::for_closure("answer", || 42);
        run_job(Box::new(job));
        assert_eq!(operation.wait().unwrap(), 42);
    }

    #[test]
    fn operation_reports_a_panic() {
        let (job, mut operation) =
            DispatcherOperation::<()>::for_closure("boom", || panic!("intentional test panic"));
        assert!(operation.try_result().is_none());
        run_job(Box::new(job));
        assert!(matches!(
            operation.try_result(),
            Some(Err(DispatcherError::WorkItemPanicked { .. }))
        ));
    }

    #[test]
    fn dropped_job_cancels_the_operation() {
        let (job, operation) = DispatcherOperation::for_closure("never runs", || 1);
        drop(job);
        assert!(matches!(
            operation.wait(),
            Err(DispatcherError::OperationCancelled)
        ));
    }
}
