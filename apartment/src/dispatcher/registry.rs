// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Process-wide map from thread to the dispatcher owning it.
//!
//! Entries are weak and get evicted: worker threads unregister when their loop
//! exits, a current-thread dispatcher unregisters when its thread ends or when
//! it is released explicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::thread::ThreadId;

use log::debug;

use super::{Dispatcher, DispatcherState, Inner};

struct Registration {
    dispatcher_id: u64,
    inner: Weak<Inner>,
}

static REGISTRY: OnceLock<Mutex<HashMap<ThreadId, Registration>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<ThreadId, Registration>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(super) fn register(thread: ThreadId, inner: &Arc<Inner>) {
    let registration = Registration {
        dispatcher_id: inner.id,
        inner: Arc::downgrade(inner),
    };
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(thread, registration);
}

/// Removes the entry of `thread`, but only if it still belongs to `dispatcher_id`.
pub(super) fn unregister(thread: ThreadId, dispatcher_id: u64) {
    let mut map = registry().lock().unwrap_or_else(PoisonError::into_inner);
    if map
        .get(&thread)
        .is_some_and(|r| r.dispatcher_id == dispatcher_id)
    {
        map.remove(&thread);
        debug!("Unregistered dispatcher #{} of {:?}", dispatcher_id, thread);
    }
}

pub(super) fn lookup(thread: ThreadId) -> Option<Dispatcher> {
    let weak = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&thread)
        .map(|r| r.inner.clone())?;
    // upgraded outside the lock: dropping the last handle must not run under it
    weak.upgrade().map(|inner| Dispatcher { inner })
}

pub(super) fn registered_count() -> usize {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

/// Keeps the current-thread dispatcher alive for as long as its thread lives.
struct CurrentGuard(Dispatcher);

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let inner = &self.0.inner;
        unregister(inner.owner_thread, inner.id);
        if inner.lifecycle.state() == DispatcherState::Disposed {
            return;
        }
        // a foreign dispose may already be waiting for this thread to pump
        // the rest, so a disposing dispatcher is drained here as well
        if inner.lifecycle.mark_disposing() {
            debug!("Thread of dispatcher '{}' ends, disposing it", inner.owner);
        }
        inner.scheduler.signal_closed();
        self.0.drain_pumped();
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentGuard>> = const { RefCell::new(None) };
}

pub(super) fn install_current(dispatcher: &Dispatcher) {
    register(dispatcher.inner.owner_thread, &dispatcher.inner);
    let previous = CURRENT
        .try_with(|current| {
            current
                .borrow_mut()
                .replace(CurrentGuard(dispatcher.clone()))
        })
        .ok()
        .flatten();
    drop(previous);
}

pub(super) fn release_current() -> bool {
    let guard = CURRENT
        .try_with(|current| current.borrow_mut().take())
        .ok()
        .flatten();
    // dropped outside the borrow, disposing may run jobs that look at CURRENT
    guard.is_some()
}
