// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! A dispatcher that runs items in caller-assigned sequence order.
//!
//! Items carry an index. The worker runs index 0, then 1, then 2, and so on,
//! buffering anything that arrives early. If an index is never submitted the
//! worker waits for it forever: strict ordering wins over liveness.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, info, warn};

use crate::config::DispatcherOptions;
use crate::dispatcher::{next_dispatcher_id, DispatcherOperation, DispatcherState, Lifecycle};
use crate::error::{DispatcherError, Result};
use crate::job_engine::closure_job::ClosureJob;
use crate::job_engine::job::{run_job, WorkItem};

struct IndexedState {
    pending: BTreeMap<i64, WorkItem>,
    next_index: i64,
    max_index_seen: i64,
    /// Index of the shutdown sentinel, once disposal began.
    sentinel: Option<i64>,
}

struct IndexedQueue {
    state: Mutex<IndexedState>,
    available: Condvar,
}

impl IndexedQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(IndexedState {
                pending: BTreeMap::new(),
                next_index: 0,
                max_index_seen: 0,
                sentinel: None,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, index: i64, job: WorkItem) -> Result<()> {
        let mut state = self.lock();
        if state.sentinel.is_some() {
            return Err(DispatcherError::OperationCancelled);
        }
        if index < state.next_index {
            return Err(DispatcherError::IndexAlreadyConsumed {
                index,
                next: state.next_index,
            });
        }
        // the sentinel goes one past the highest index and needs a free slot
        if index == i64::MAX {
            return Err(DispatcherError::IndexOutOfRange { index });
        }
        if state.pending.contains_key(&index) {
            return Err(DispatcherError::DuplicateIndex { index });
        }
        state.pending.insert(index, job);
        state.max_index_seen = state.max_index_seen.max(index + 1);
        let wake = index == state.next_index;
        drop(state);
        if wake {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Places the shutdown sentinel behind everything submitted so far.
    fn close(&self) -> i64 {
        let mut state = self.lock();
        let index = state.max_index_seen;
        state.sentinel = Some(index);
        state
            .pending
            .insert(index, Box::new(ClosureJob::new("shutdown sentinel", || {})));
        let wake = index == state.next_index;
        drop(state);
        if wake {
            self.available.notify_one();
        }
        index
    }

    /// Blocks until the item with the next expected index is available.
    /// Returns it together with whether it is the shutdown sentinel.
    fn next_item(&self) -> (WorkItem, bool) {
        let mut state = self.lock();
        loop {
            let index = state.next_index;
            if let Some(job) = state.pending.remove(&index) {
                state.next_index += 1;
                return (job, state.sentinel == Some(index));
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Handle to an indexed dispatcher. Cloning is cheap.
#[derive(Clone)]
pub struct IndexedDispatcher {
    inner: Arc<IndexedInner>,
}

struct IndexedInner {
    id: u64,
    owner: String,
    owner_thread: ThreadId,
    queue: Arc<IndexedQueue>,
    lifecycle: Arc<Lifecycle>,
    worker: Mutex<Option<JoinHandle<()>>>,
    executed: Arc<AtomicU64>,
}

impl Drop for IndexedInner {
    fn drop(&mut self) {
        if self.lifecycle.mark_disposing() {
            let index = self.queue.close();
            debug!(
                "Last handle of indexed dispatcher '{}' dropped, sentinel placed at {}",
                self.owner, index
            );
        }
    }
}

impl IndexedDispatcher {
    pub fn new(owner: impl Into<String>) -> Result<Self> {
        Self::with_options(owner, DispatcherOptions::default())
    }

    pub fn with_options(owner: impl Into<String>, options: DispatcherOptions) -> Result<Self> {
        let owner = owner.into();
        if owner.is_empty() {
            return Err(DispatcherError::InvalidOwner);
        }
        let id = next_dispatcher_id();
        let queue = Arc::new(IndexedQueue::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let executed = Arc::new(AtomicU64::new(0));

        let worker_queue = queue.clone();
        let worker_lifecycle = lifecycle.clone();
        let worker_executed = executed.clone();
        let worker_owner = owner.clone();
        let handle = options.thread_builder(&owner).spawn(move || {
            indexed_worker_loop(worker_owner, worker_queue, worker_lifecycle, worker_executed)
        })?;
        let owner_thread = handle.thread().id();
        info!(
            "Started indexed dispatcher '{}' (#{}) on {:?}",
            owner, id, owner_thread
        );

        Ok(Self {
            inner: Arc::new(IndexedInner {
                id,
                owner,
                owner_thread,
                queue,
                lifecycle,
                worker: Mutex::new(Some(handle)),
                executed,
            }),
        })
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

    pub fn state(&self) -> DispatcherState {
        self.inner.lifecycle.state()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == DispatcherState::Disposed
    }

    /// The index the worker is waiting for (or will run next).
    pub fn next_index(&self) -> i64 {
        self.inner.queue.lock().next_index
    }

    /// Number of buffered items, including ones that arrived out of order.
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    /// Number of user items executed so far.
    pub fn executed(&self) -> u64 {
        self.inner.executed.load(Ordering::Acquire)
    }

    pub fn check_access(&self) -> bool {
        thread::current().id() == self.inner.owner_thread
    }

    pub fn verify_access(&self) -> Result<()> {
        if self.check_access() {
            Ok(())
        } else {
            Err(DispatcherError::IllegalCrossThreadAccess {
                owner: self.inner.owner.clone(),
            })
        }
    }

    /// Buffers `f` under `index`; it runs once every smaller index has run.
    pub fn invoke_async<F, R>(&self, index: i64, f: F) -> Result<DispatcherOperation<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.inner.lifecycle.is_running() {
            return Err(DispatcherError::OperationCancelled);
        }
        let (job, operation) = DispatcherOperation::for_closure(format!("indexed item {index}"), f);
        self.inner.queue.submit(index, Box::new(job))?;
        Ok(operation)
    }

    /// Like [`IndexedDispatcher::invoke_async`], blocking until `f` ran.
    ///
    /// Fails with [`DispatcherError::WouldDeadlock`] on the dispatcher's own
    /// thread: the item cannot run inline without breaking the sequence.
    pub fn invoke<F, R>(&self, index: i64, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.check_access() {
            return Err(DispatcherError::WouldDeadlock);
        }
        self.invoke_async(index, f)?.wait()
    }

    /// Stops accepting items and waits until everything before the shutdown
    /// sentinel ran. Blocks forever if an index below the sentinel is missing.
    pub fn dispose(&self) -> Result<()> {
        self.begin_dispose()?;
        if self.check_access() {
            debug!(
                "Indexed dispatcher '{}' disposed from its own thread",
                self.inner.owner
            );
            return Ok(());
        }
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Worker of indexed dispatcher '{}' panicked", self.inner.owner);
            }
        }
        Ok(())
    }

    pub fn dispose_async(&self) -> Result<impl Future<Output = ()> + Send + 'static> {
        self.begin_dispose()?;
        Ok(self.inner.lifecycle.exited())
    }

    fn begin_dispose(&self) -> Result<()> {
        self.inner.lifecycle.begin_dispose()?;
        let index = self.inner.queue.close();
        info!(
            "Disposing indexed dispatcher '{}', sentinel placed at index {}",
            self.inner.owner, index
        );
        Ok(())
    }

    pub fn add_disposed_handler<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lifecycle.add_disposed_handler(Box::new(f));
    }
}

impl std::fmt::Debug for IndexedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedDispatcher")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("state", &self.state())
            .field("next_index", &self.next_index())
            .finish()
    }
}

fn indexed_worker_loop(
    owner: String,
    queue: Arc<IndexedQueue>,
    lifecycle: Arc<Lifecycle>,
    executed: Arc<AtomicU64>,
) {
    info!("Starting loop for indexed dispatcher '{}'", owner);
    loop {
        let (job, is_sentinel) = queue.next_item();
        if is_sentinel {
            break;
        }
        run_job(job);
        executed.fetch_add(1, Ordering::AcqRel);
    }
    lifecycle.finish();
    info!("Loop for indexed dispatcher '{}' ended", owner);
}
