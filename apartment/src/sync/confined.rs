// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::cell::RefCell;
use std::thread::{self, ThreadId};

use crate::dispatcher::Dispatcher;
use crate::error::{DispatcherError, Result};

/// State that may only be touched on the thread of one dispatcher.
///
/// The handle itself can be shared freely, typically captured by closures
/// submitted to that dispatcher. Every access checks the calling thread, so
/// the value needs no lock.
pub struct Confined<T> {
    owner: String,
    owner_thread: ThreadId,
    value: RefCell<T>,
}

// SAFETY: shared access only reaches the RefCell through `with`, which runs on
// `owner_thread` alone. Dropping the last handle elsewhere needs `T: Send`.
unsafe impl<T: Send> Sync for Confined<T> {}

impl<T> Confined<T> {
    pub fn new(dispatcher: &Dispatcher, value: T) -> Self {
        Self {
            owner: dispatcher.owner().to_string(),
            owner_thread: dispatcher.owner_thread(),
            value: RefCell::new(value),
        }
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.owner_thread
    }

    /// Runs `f` with exclusive access to the value.
    ///
    /// Fails off the owning thread, and on nested access from within `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        if thread::current().id() != self.owner_thread {
            return Err(DispatcherError::IllegalCrossThreadAccess {
                owner: self.owner.clone(),
            });
        }
        let mut value = self
            .value
            .try_borrow_mut()
            .map_err(|_| DispatcherError::ReentrantAccess {
                owner: self.owner.clone(),
            })?;
        Ok(f(&mut value))
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> std::fmt::Debug for Confined<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confined")
            .field("owner", &self.owner)
            .field("owner_thread", &self.owner_thread)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};

    #[test]
    fn access_is_limited_to_the_dispatcher_thread() {
        let dispatcher = Dispatcher::new("confined").unwrap();
        let counter = Arc::new(Confined::new(&dispatcher, 0u32));

        assert!(matches!(
            counter.with(|c| *c += 1),
            Err(DispatcherError::IllegalCrossThreadAccess { .. })
        ));

        for _ in 0..10 {
            let counter = counter.clone();
            dispatcher
                .post(move || counter.with(|c| *c += 1).unwrap())
                .unwrap();
        }
        let inner = counter.clone();
        assert_eq!(dispatcher.invoke(move || inner.with(|c| *c)).unwrap().unwrap(), 10);
        dispatcher.dispose().unwrap();
    }

    struct DropRecorder(mpsc::Sender<thread::ThreadId>);

    impl Drop for DropRecorder {
        fn drop(&mut self) {
            let _ = self.0.send(thread::current().id());
        }
    }

    #[test]
    fn last_handle_may_be_dropped_on_a_foreign_thread() {
        let dispatcher = Dispatcher::new("confined-drop").unwrap();
        let (tx, rx) = mpsc::channel();
        let cell = Arc::new(Confined::new(&dispatcher, DropRecorder(tx)));

        let on_thread = cell.clone();
        dispatcher
            .invoke(move || on_thread.with(|_| ()).unwrap())
            .unwrap();
        dispatcher.dispose().unwrap();

        let dropper = thread::spawn(move || {
            drop(cell);
            thread::current().id()
        });
        let foreign = dropper.join().unwrap();
        assert_eq!(rx.recv().unwrap(), foreign);
        assert_ne!(foreign, dispatcher.owner_thread());
    }

    #[test]
    fn nested_access_is_refused() {
        let dispatcher = Dispatcher::new("nested").unwrap();
        let cell = Arc::new(Confined::new(&dispatcher, Vec::<u8>::new()));

        let inner = cell.clone();
        let nested = dispatcher
            .invoke(move || inner.with(|_| inner.with(|v| v.push(1)).is_err()))
            .unwrap()
            .unwrap();
        assert!(nested);
        dispatcher.dispose().unwrap();
        assert!(Arc::try_unwrap(cell).unwrap().into_inner().is_empty());
    }
}
