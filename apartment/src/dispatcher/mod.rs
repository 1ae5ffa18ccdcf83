// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! A private, serialized execution context backed by one thread.
//!
//! Work submitted from any thread is executed one item at a time on the
//! dispatcher's owning thread, in submission order. A blocking [`Dispatcher::invoke`]
//! issued from the owning thread itself runs inline instead, so nested calls
//! never wait on their own queue.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use futures::future::FutureExt;
use log::{debug, info, warn};

use crate::config::DispatcherOptions;
use crate::error::{DispatcherError, Result};
use crate::job_engine::closure_job::ClosureJob;
use crate::job_engine::job::run_job;
use crate::job_engine::local_task;
use crate::job_engine::scheduler::{Scheduler, WorkSource};

mod lifecycle;
mod operation;
mod registry;

pub(crate) use lifecycle::Lifecycle;
pub use lifecycle::DispatcherState;
pub use operation::DispatcherOperation;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_dispatcher_id() -> u64 {
    NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a dispatcher. Cloning is cheap; all clones address the same thread.
///
/// Dropping the last handle without disposing closes the queue: the worker
/// still drains what was queued and then exits on its own.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    owner: String,
    owner_thread: ThreadId,
    scheduler: Scheduler,
    lifecycle: Arc<Lifecycle>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// No worker thread: the owner drains the queue itself.
    pumped: bool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.lifecycle.mark_disposing() {
            debug!(
                "Last handle of dispatcher '{}' dropped, closing its queue",
                self.owner
            );
        }
        self.scheduler.signal_closed();
        if self.pumped {
            // nobody is left to pump, queued items are dropped with the queue
            self.lifecycle.finish();
        }
    }
}

impl Dispatcher {
    /// Creates a dispatcher and starts its worker thread.
    /// `owner` labels the dispatcher in logs, errors and the thread name.
    pub fn new(owner: impl Into<String>) -> Result<Self> {
        Self::with_options(owner, DispatcherOptions::default())
    }

    pub fn with_options(owner: impl Into<String>, options: DispatcherOptions) -> Result<Self> {
        let owner = owner.into();
        if owner.is_empty() {
            return Err(DispatcherError::InvalidOwner);
        }
        let id = next_dispatcher_id();
        let scheduler = Scheduler::new();
        let lifecycle = Arc::new(Lifecycle::new());

        let source = scheduler.source();
        let worker_lifecycle = lifecycle.clone();
        let worker_owner = owner.clone();
        let handle = options
            .thread_builder(&owner)
            .spawn(move || worker_loop(id, worker_owner, source, worker_lifecycle))?;
        let owner_thread = handle.thread().id();

        let inner = Arc::new(Inner {
            id,
            owner,
            owner_thread,
            scheduler,
            lifecycle,
            worker: Mutex::new(Some(handle)),
            pumped: false,
        });
        registry::register(owner_thread, &inner);
        info!(
            "Started dispatcher '{}' (#{}) on {:?}",
            inner.owner, id, owner_thread
        );
        Ok(Self { inner })
    }

    fn pumped(owner: String) -> Self {
        let id = next_dispatcher_id();
        Self {
            inner: Arc::new(Inner {
                id,
                owner,
                owner_thread: thread::current().id(),
                scheduler: Scheduler::new(),
                lifecycle: Arc::new(Lifecycle::new()),
                worker: Mutex::new(None),
                pumped: true,
            }),
        }
    }

    /// The dispatcher owning the calling thread.
    ///
    /// On a dispatcher worker thread this is that dispatcher. On any other
    /// thread a dispatcher without worker is created on first use; the thread
    /// runs its work by calling [`Dispatcher::process_all`] or
    /// [`Dispatcher::process_once`]. It stays registered until the thread ends
    /// or [`Dispatcher::release_current`] is called.
    pub fn current() -> Dispatcher {
        let thread = thread::current();
        if let Some(dispatcher) = registry::lookup(thread.id()) {
            if !dispatcher.is_disposed() {
                return dispatcher;
            }
        }
        let owner = match thread.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", thread.id()),
        };
        let dispatcher = Self::pumped(owner);
        registry::install_current(&dispatcher);
        debug!(
            "Created current-thread dispatcher '{}' (#{})",
            dispatcher.owner(),
            dispatcher.id()
        );
        dispatcher
    }

    /// Unregisters and disposes the current-thread dispatcher of the calling
    /// thread, draining its queue first. Returns `false` if there was none.
    pub fn release_current() -> bool {
        registry::release_current()
    }

    /// The dispatcher owning `thread`, if it is still alive.
    pub fn from_thread(thread: ThreadId) -> Option<Dispatcher> {
        registry::lookup(thread).filter(|d| !d.is_disposed())
    }

    /// Number of threads that currently have a dispatcher registered.
    pub fn registered_threads() -> usize {
        registry::registered_count()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.inner.owner_thread
    }

    pub fn has_worker_thread(&self) -> bool {
        !self.inner.pumped
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.lifecycle.state()
    }

    pub fn is_disposing(&self) -> bool {
        self.state() != DispatcherState::Running
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == DispatcherState::Disposed
    }

    /// Number of items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.scheduler.len()
    }

    /// True iff the calling thread is the dispatcher's owning thread.
    pub fn check_access(&self) -> bool {
        thread::current().id() == self.inner.owner_thread
    }

    /// Fails with [`DispatcherError::IllegalCrossThreadAccess`] off the owning thread.
    pub fn verify_access(&self) -> Result<()> {
        if self.check_access() {
            Ok(())
        } else {
            Err(DispatcherError::IllegalCrossThreadAccess {
                owner: self.inner.owner.clone(),
            })
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.lifecycle.is_running() {
            Ok(())
        } else {
            Err(DispatcherError::OperationCancelled)
        }
    }

    /// Executes `f` on the dispatcher thread and blocks until it returned.
    ///
    /// On the owning thread `f` runs inline. A panic in `f` is reported as
    /// [`DispatcherError::WorkItemPanicked`] to the caller.
    pub fn invoke<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.check_access() {
            self.ensure_running()?;
            return panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(DispatcherError::from_panic);
        }
        self.invoke_async(f)?.wait()
    }

    /// Queues `f` and returns immediately with a handle to its result.
    pub fn invoke_async<F, R>(&self, f: F) -> Result<DispatcherOperation<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_running()?;
        let (job, operation) = DispatcherOperation::for_closure("invoke", f);
        self.inner.scheduler.enqueue(Box::new(job))?;
        Ok(operation)
    }

    /// Queues `f` without a way to observe its outcome. Panics are logged.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        self.inner
            .scheduler
            .enqueue(Box::new(ClosureJob::new("post", f)))
    }

    /// Runs a future on the dispatcher thread.
    ///
    /// `factory` is called on the dispatcher thread, so the future it returns
    /// does not need to be `Send`. It is only ever polled there: each wake-up
    /// is queued like any other item, which makes every continuation resume on
    /// the dispatcher thread. A task still suspended when the dispatcher exits
    /// is dropped and its operation resolves with `OperationCancelled`.
    pub fn spawn<F, Fut>(&self, factory: F) -> Result<DispatcherOperation<Fut::Output>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + 'static,
        Fut::Output: Send + 'static,
    {
        self.ensure_running()?;
        let (tx, rx) = futures::channel::oneshot::channel();
        let dispatcher_id = self.inner.id;
        let queue = self.inner.scheduler.downgrade();
        let job = ClosureJob::new("spawn local task", move || {
            let task = async move {
                let outcome = AssertUnwindSafe(async move { factory().await })
                    .catch_unwind()
                    .await
                    .map_err(DispatcherError::from_panic);
                let _ = tx.send(outcome);
            };
            local_task::spawn_local(dispatcher_id, queue, task.boxed_local());
        });
        self.inner.scheduler.enqueue(Box::new(job))?;
        Ok(DispatcherOperation::new(rx))
    }

    /// Runs one pending item on the calling thread, which must own the dispatcher.
    pub fn process_once(&self) -> Result<bool> {
        self.verify_access()?;
        let processed = self.inner.scheduler.process_once();
        self.finish_if_drained();
        Ok(processed)
    }

    /// Runs pending items on the calling thread until the queue is idle.
    pub fn process_all(&self) -> Result<usize> {
        self.verify_access()?;
        let processed = self.inner.scheduler.process_all();
        self.finish_if_drained();
        Ok(processed)
    }

    fn finish_if_drained(&self) {
        let inner = &self.inner;
        if inner.pumped
            && inner.lifecycle.state() == DispatcherState::Disposing
            && inner.scheduler.is_empty()
        {
            self.finish_pumped();
        }
    }

    /// Runs what is left in the queue of a pumped dispatcher whose disposal
    /// already began, then finishes it. Must run on the owning thread.
    fn drain_pumped(&self) {
        self.inner.scheduler.process_all();
        self.finish_pumped();
    }

    fn finish_pumped(&self) {
        let inner = &self.inner;
        local_task::drop_local_tasks(inner.id);
        registry::unregister(inner.owner_thread, inner.id);
        if inner.lifecycle.finish() {
            info!("Dispatcher '{}' disposed", inner.owner);
        }
    }

    /// Stops accepting work, drains the queue and waits for the worker to exit.
    ///
    /// Called from the dispatcher's own thread it cannot wait for itself: it
    /// only stops acceptance and the loop exits after the current item.
    pub fn dispose(&self) -> Result<()> {
        self.begin_dispose()?;
        let inner = &self.inner;
        if inner.pumped {
            if !self.check_access() {
                futures::executor::block_on(inner.lifecycle.exited());
            }
            return Ok(());
        }
        if self.check_access() {
            debug!(
                "Dispatcher '{}' disposed from its own thread, exiting after the current item",
                inner.owner
            );
            return Ok(());
        }
        let handle = inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Worker of dispatcher '{}' panicked", inner.owner);
            }
        }
        Ok(())
    }

    /// Like [`Dispatcher::dispose`], but returns a future that resolves once the
    /// dispatcher reached [`DispatcherState::Disposed`].
    pub fn dispose_async(&self) -> Result<impl Future<Output = ()> + Send + 'static> {
        self.begin_dispose()?;
        Ok(self.inner.lifecycle.exited())
    }

    fn begin_dispose(&self) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.begin_dispose()?;
        info!("Disposing dispatcher '{}'", inner.owner);
        inner.scheduler.signal_closed();
        if inner.pumped && self.check_access() {
            self.drain_pumped();
        }
        Ok(())
    }

    /// Registers a callback that runs once the dispatcher reached
    /// [`DispatcherState::Disposed`]. Runs immediately if it already has.
    pub fn add_disposed_handler<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lifecycle.add_disposed_handler(Box::new(f));
    }

    #[cfg(test)]
    pub(crate) fn suspended_tasks(&self) -> usize {
        local_task::local_task_count(self.inner.id)
    }
}

impl PartialEq for Dispatcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Dispatcher {}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("owner_thread", &self.inner.owner_thread)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Body of the worker thread: run jobs until the queue is closed and drained.
fn worker_loop(id: u64, owner: String, source: WorkSource, lifecycle: Arc<Lifecycle>) {
    info!("Starting loop for dispatcher '{}'", owner);
    while let Some(job) = source.try_dequeue(true) {
        run_job(job);
    }
    local_task::drop_local_tasks(id);
    registry::unregister(thread::current().id(), id);
    lifecycle.finish();
    info!("Loop for dispatcher '{}' ended, queue closed and drained", owner);
}
