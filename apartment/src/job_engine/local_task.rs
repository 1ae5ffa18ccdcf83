// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Storage and wake-up plumbing for futures confined to a dispatcher thread.
//!
//! A spawned future never leaves the thread that owns its dispatcher. It is
//! parked in thread-local storage between polls, and its waker queues a
//! [`PollJob`] on the dispatcher, so every continuation takes a regular FIFO
//! turn on the owning thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_channel::WeakSender;
use futures::future::LocalBoxFuture;
use futures::task::{waker, ArcWake};
use log::debug;

use crate::job_engine::job::{Job, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskKey {
    dispatcher: u64,
    task: u64,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static LOCAL_TASKS: RefCell<HashMap<TaskKey, LocalBoxFuture<'static, ()>>> =
        RefCell::new(HashMap::new());
}

struct TaskWaker {
    key: TaskKey,
    queue: WeakSender<WorkItem>,
    scheduled: AtomicBool,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let job = Box::new(PollJob {
            waker: arc_self.clone(),
        });
        let queued = match arc_self.queue.upgrade() {
            Some(tx) => tx.try_send(job).is_ok(),
            None => false,
        };
        if !queued {
            debug!(
                "Dropping wake-up of task {:?}: dispatcher no longer accepts work",
                arc_self.key
            );
        }
    }
}

struct PollJob {
    waker: Arc<TaskWaker>,
}

impl Job for PollJob {
    fn desc(&self) -> &str {
        "resume local task"
    }

    fn execute(self: Box<Self>) {
        self.waker.scheduled.store(false, Ordering::Release);
        poll_task(&self.waker);
    }
}

fn poll_task(task_waker: &Arc<TaskWaker>) {
    let key = task_waker.key;
    let future = LOCAL_TASKS
        .try_with(|tasks| tasks.borrow_mut().remove(&key))
        .ok()
        .flatten();
    // already completed or dropped on shutdown
    let Some(mut future) = future else {
        return;
    };

    let w = waker(task_waker.clone());
    let mut cx = Context::from_waker(&w);
    if let Poll::Pending = future.as_mut().poll(&mut cx) {
        let _ = LOCAL_TASKS.try_with(|tasks| tasks.borrow_mut().insert(key, future));
    }
}

/// Parks `future` on the calling thread and polls it for the first time.
/// Must run on the thread that owns `dispatcher`.
pub(crate) fn spawn_local(
    dispatcher: u64,
    queue: WeakSender<WorkItem>,
    future: LocalBoxFuture<'static, ()>,
) {
    let key = TaskKey {
        dispatcher,
        task: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
    };
    let stored = LOCAL_TASKS
        .try_with(|tasks| tasks.borrow_mut().insert(key, future))
        .is_ok();
    if !stored {
        debug!("Thread is shutting down, local task {:?} not started", key);
        return;
    }
    poll_task(&Arc::new(TaskWaker {
        key,
        queue,
        scheduled: AtomicBool::new(false),
    }));
}

/// Drops every suspended task of `dispatcher` on the calling thread.
pub(crate) fn drop_local_tasks(dispatcher: u64) -> usize {
    let removed: Vec<LocalBoxFuture<'static, ()>> = LOCAL_TASKS
        .try_with(|tasks| {
            let mut tasks = tasks.borrow_mut();
            let keys: Vec<TaskKey> = tasks
                .keys()
                .filter(|key| key.dispatcher == dispatcher)
                .copied()
                .collect();
            keys.iter().filter_map(|key| tasks.remove(key)).collect()
        })
        .unwrap_or_default();
    // dropped outside the borrow, destructors may touch the map again
    let count = removed.len();
    drop(removed);
    if count > 0 {
        debug!(
            "Dropped {} suspended task(s) of dispatcher #{}",
            count, dispatcher
        );
    }
    count
}

/// Number of suspended tasks of `dispatcher` parked on the calling thread.
#[cfg(test)]
pub(crate) fn local_task_count(dispatcher: u64) -> usize {
    LOCAL_TASKS
        .try_with(|tasks| {
            tasks
                .borrow()
                .keys()
                .filter(|key| key.dispatcher == dispatcher)
                .count()
        })
        .unwrap_or(0)
}
