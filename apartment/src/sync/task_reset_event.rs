// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Named one-shot events confined to a dispatcher.
//!
//! Both waiting and signalling are work items on the same dispatcher, so the
//! key-to-signal map is only ever touched by its thread and needs no lock.
//! Signalling a key nobody waits on yet is allowed: the signal is kept and a
//! later wait on that key completes immediately.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::dispatcher::Dispatcher;
use crate::error::{DispatcherError, Result};
use crate::sync::confined::Confined;

type Waiters = Shared<oneshot::Receiver<()>>;

enum Signal {
    Pending {
        trigger: oneshot::Sender<()>,
        waiters: Waiters,
    },
    Signaled,
}

/// A set of one-shot events, one per key, living on a dispatcher.
pub struct TaskResetEvent<T> {
    dispatcher: Dispatcher,
    signals: Arc<Confined<HashMap<T, Signal>>>,
}

impl<T> Clone for TaskResetEvent<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<T> TaskResetEvent<T>
where
    T: Eq + Hash + Send + 'static,
{
    pub fn new(dispatcher: Dispatcher) -> Self {
        let signals = Arc::new(Confined::new(&dispatcher, HashMap::new()));
        Self {
            dispatcher,
            signals,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Resolves once `key` is set. Registration is queued right away, so a
    /// `set_async` issued after this call is observed even if the returned
    /// future is polled later.
    pub fn wait_async(&self, key: T) -> BoxFuture<'static, Result<()>> {
        let signals = self.signals.clone();
        let registration = self
            .dispatcher
            .invoke_async(move || signals.with(|map| register_waiter(map, key)));
        async move {
            match registration?.await?? {
                None => Ok(()),
                // the trigger is dropped if the key gets reset while we wait
                Some(waiters) => waiters
                    .await
                    .map_err(|_| DispatcherError::OperationCancelled),
            }
        }
        .boxed()
    }

    /// Sets `key` from any thread, releasing everyone waiting on it.
    pub fn set_async(&self, key: T) -> BoxFuture<'static, Result<()>> {
        let signals = self.signals.clone();
        let operation = self
            .dispatcher
            .invoke_async(move || signals.with(|map| signal(map, key)));
        async move { operation?.await? }.boxed()
    }

    /// Sets every key in `keys`. Only valid on the dispatcher's thread.
    pub fn set<I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        self.dispatcher.verify_access()?;
        self.signals.with(|map| {
            for key in keys {
                signal(map, key);
            }
        })
    }

    /// Forgets `key`, so the next wait on it starts over. Only valid on the
    /// dispatcher's thread. Returns whether there was an entry.
    pub fn reset(&self, key: &T) -> Result<bool> {
        self.dispatcher.verify_access()?;
        self.signals.with(|map| map.remove(key).is_some())
    }

    /// Whether `key` is currently set. Only valid on the dispatcher's thread.
    pub fn is_set(&self, key: &T) -> Result<bool> {
        self.dispatcher.verify_access()?;
        self.signals
            .with(|map| matches!(map.get(key), Some(Signal::Signaled)))
    }
}

/// Returns `None` if `key` is already set, otherwise what to wait on.
fn register_waiter<T: Eq + Hash>(map: &mut HashMap<T, Signal>, key: T) -> Option<Waiters> {
    match map.entry(key) {
        Entry::Occupied(entry) => match entry.get() {
            Signal::Signaled => None,
            Signal::Pending { waiters, .. } => Some(waiters.clone()),
        },
        Entry::Vacant(entry) => {
            let (trigger, rx) = oneshot::channel();
            let waiters = rx.shared();
            entry.insert(Signal::Pending {
                trigger,
                waiters: waiters.clone(),
            });
            Some(waiters)
        }
    }
}

fn signal<T: Eq + Hash>(map: &mut HashMap<T, Signal>, key: T) {
    if let Some(Signal::Pending { trigger, .. }) = map.insert(key, Signal::Signaled) {
        let _ = trigger.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn set_before_wait_resolves_immediately() {
        let dispatcher = Dispatcher::new("events").unwrap();
        let event = TaskResetEvent::new(dispatcher.clone());

        block_on(event.set_async("k")).unwrap();
        block_on(event.wait_async("k")).unwrap();

        let probe = event.clone();
        assert!(dispatcher.invoke(move || probe.is_set(&"k")).unwrap().unwrap());
        dispatcher.dispose().unwrap();
    }

    #[test]
    fn wait_before_set_resolves_only_after_set() {
        let dispatcher = Dispatcher::new("events-late").unwrap();
        let event = TaskResetEvent::new(dispatcher.clone());

        let mut first = event.wait_async("k".to_string());
        let second = event.wait_async("k".to_string());
        // registration is done once an item queued after it has run
        dispatcher.invoke(|| ()).unwrap();
        assert!((&mut first).now_or_never().is_none());

        let setter = event.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            block_on(setter.set_async("k".to_string())).unwrap();
        });

        block_on(first).unwrap();
        block_on(second).unwrap();
        dispatcher.dispose().unwrap();
    }

    #[test]
    fn keys_are_independent() {
        let dispatcher = Dispatcher::new("events-keys").unwrap();
        let event = TaskResetEvent::new(dispatcher.clone());

        let mut a = event.wait_async(1u32);
        block_on(event.set_async(2)).unwrap();
        assert!((&mut a).now_or_never().is_none());

        block_on(event.set_async(1)).unwrap();
        block_on(a).unwrap();
        dispatcher.dispose().unwrap();
    }

    #[test]
    fn set_and_reset_require_the_dispatcher_thread() {
        let dispatcher = Dispatcher::new("events-affine").unwrap();
        let event = TaskResetEvent::new(dispatcher.clone());

        assert!(matches!(
            event.set(["a"]),
            Err(DispatcherError::IllegalCrossThreadAccess { .. })
        ));
        assert!(matches!(
            event.reset(&"a"),
            Err(DispatcherError::IllegalCrossThreadAccess { .. })
        ));

        let on_thread = event.clone();
        let (had_entry, still_set) = dispatcher
            .invoke(move || {
                on_thread.set(["a", "b"]).unwrap();
                let had_entry = on_thread.reset(&"a").unwrap();
                (had_entry, on_thread.is_set(&"b").unwrap())
            })
            .unwrap();
        assert!(had_entry);
        assert!(still_set);

        // "a" starts over after the reset
        let mut waiter = event.wait_async("a");
        dispatcher.invoke(|| ()).unwrap();
        assert!((&mut waiter).now_or_never().is_none());
        block_on(event.set_async("a")).unwrap();
        block_on(waiter).unwrap();
        dispatcher.dispose().unwrap();
    }

    #[test]
    fn reset_while_waiting_cancels_the_waiters() {
        let dispatcher = Dispatcher::new("events-reset").unwrap();
        let event = TaskResetEvent::new(dispatcher.clone());

        let waiter = event.wait_async(7u8);
        let on_thread = event.clone();
        assert!(dispatcher.invoke(move || on_thread.reset(&7)).unwrap().unwrap());
        assert!(matches!(
            block_on(waiter),
            Err(DispatcherError::OperationCancelled)
        ));
        dispatcher.dispose().unwrap();
    }

    #[test]
    fn waiting_on_a_disposed_dispatcher_fails() {
        let dispatcher = Dispatcher::new("events-closed").unwrap();
        let event = TaskResetEvent::<u8>::new(dispatcher.clone());
        dispatcher.dispose().unwrap();

        assert!(matches!(
            block_on(event.wait_async(1)),
            Err(DispatcherError::OperationCancelled)
        ));
        assert!(matches!(
            block_on(event.set_async(1)),
            Err(DispatcherError::OperationCancelled)
        ));
    }
}
