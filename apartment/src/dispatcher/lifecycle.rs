// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use log::warn;

use crate::error::{DispatcherError, Result};

const RUNNING: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// Externally visible state of a dispatcher. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatcherState {
    /// Accepting and executing work.
    Running,
    /// No new work accepted, queued work still drains.
    Disposing,
    /// The loop has exited.
    Disposed,
}

type DisposedHandler = Box<dyn FnOnce() + Send + 'static>;

/// Running -> Disposing -> Disposed, plus the "disposed" notification.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    exit_tx: Mutex<Option<oneshot::Sender<()>>>,
    exited: Shared<oneshot::Receiver<()>>,
    handlers: Mutex<Vec<DisposedHandler>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (exit_tx, exit_rx) = oneshot::channel();
        Self {
            state: AtomicU8::new(RUNNING),
            exit_tx: Mutex::new(Some(exit_tx)),
            exited: exit_rx.shared(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> DispatcherState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => DispatcherState::Running,
            DISPOSING => DispatcherState::Disposing,
            _ => DispatcherState::Disposed,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    /// Moves to `Disposing`. Returns `false` if disposal had already begun.
    pub(crate) fn mark_disposing(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn begin_dispose(&self) -> Result<()> {
        if self.mark_disposing() {
            Ok(())
        } else {
            Err(DispatcherError::AlreadyDisposed)
        }
    }

    /// Moves to `Disposed`, wakes everyone waiting on [`Self::exited`] and runs
    /// the disposed handlers. Only the first call has an effect.
    pub(crate) fn finish(&self) -> bool {
        let handlers = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            if self.state.swap(DISPOSED, Ordering::AcqRel) == DISPOSED {
                return false;
            }
            std::mem::take(&mut *handlers)
        };
        if let Some(tx) = self
            .exit_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
        for handler in handlers {
            run_handler(handler);
        }
        true
    }

    /// Resolves once the dispatcher reached `Disposed`.
    pub(crate) fn exited(&self) -> impl Future<Output = ()> + Send + 'static {
        self.exited.clone().map(|_| ())
    }

    pub(crate) fn add_disposed_handler(&self, handler: DisposedHandler) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.load(Ordering::Acquire) == DISPOSED {
            drop(handlers);
            run_handler(handler);
        } else {
            handlers.push(handler);
        }
    }
}

fn run_handler(handler: DisposedHandler) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(handler)) {
        warn!(
            "Disposed handler failed: {}",
            DispatcherError::from_panic(payload)
        );
    }
}
