// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_channel::{Receiver, Sender, WeakSender};

use crate::error::{DispatcherError, Result};
use crate::job_engine::job::{run_job, WorkItem};

/// Unbounded multi-producer FIFO of pending jobs.
///
/// Closing the scheduler refuses new jobs but leaves queued ones receivable, so
/// a consumer keeps dequeuing until the queue is both closed and empty.
pub struct Scheduler {
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Appends a job to the tail. Never blocks.
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.tx
            .try_send(item)
            .map_err(|_| DispatcherError::OperationCancelled)
    }

    /// Pops the head of the queue.
    ///
    /// With `blocking` set, waits until a job arrives or the queue is closed.
    /// Returns `None` when nothing is available (or will ever be, if closed).
    pub fn try_dequeue(&self, blocking: bool) -> Option<WorkItem> {
        dequeue(&self.rx, blocking)
    }

    /// Refuses further jobs and wakes a blocked consumer once the queue is drained.
    /// Returns `false` if the queue was already closed.
    pub fn signal_closed(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Runs a single pending job on the calling thread, if there is one.
    pub fn process_once(&self) -> bool {
        match self.try_dequeue(false) {
            Some(job) => {
                run_job(job);
                true
            }
            None => false,
        }
    }

    /// Runs pending jobs on the calling thread until the queue is idle.
    /// Jobs enqueued while draining are run as well.
    pub fn process_all(&self) -> usize {
        let mut processed = 0;
        while self.process_once() {
            processed += 1;
        }
        processed
    }

    /// The consumer half, for a worker thread that should not keep the
    /// producer side alive.
    pub fn source(&self) -> WorkSource {
        WorkSource {
            rx: self.rx.clone(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSender<WorkItem> {
        self.tx.downgrade()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer half of a [`Scheduler`].
#[derive(Debug)]
pub struct WorkSource {
    rx: Receiver<WorkItem>,
}

impl WorkSource {
    pub fn try_dequeue(&self, blocking: bool) -> Option<WorkItem> {
        dequeue(&self.rx, blocking)
    }
}

fn dequeue(rx: &Receiver<WorkItem>, blocking: bool) -> Option<WorkItem> {
    if blocking {
        rx.recv_blocking().ok()
    } else {
        rx.try_recv().ok()
    }
}
