// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use anyhow::Context;
use apartment::{Dispatcher, IndexedDispatcher, TaskResetEvent};
use futures::channel::oneshot;
use futures::executor::block_on;
use log::debug;
use serde::Serialize;

use crate::global_config::{GlobalConfig, Scenario};

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub items: usize,
    pub producers: usize,
    pub executed: usize,
    /// Whether the scenario's ordering property held.
    pub ordered: bool,
    /// Whether two items of one dispatcher ever ran at the same time.
    pub overlapped: bool,
    pub passed: bool,
    pub elapsed_ms: u128,
}

pub fn run(config: &GlobalConfig) -> anyhow::Result<ScenarioReport> {
    let started = Instant::now();
    let (executed, ordered, overlapped) = match config.scenario {
        Scenario::Fifo => fifo(config)?,
        Scenario::Indexed => indexed(config)?,
        Scenario::Events => events(config)?,
        Scenario::Drain => drain(config)?,
        Scenario::Async => spawned(config)?,
    };
    Ok(ScenarioReport {
        scenario: config.scenario,
        items: config.items,
        producers: config.producers,
        executed,
        ordered,
        overlapped,
        passed: executed == config.items && ordered && !overlapped,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

/// Tracks how many items run at once.
#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    overlapped: AtomicBool,
}

impl Probe {
    fn enter(&self) {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn share(items: usize, producers: usize, producer: usize) -> usize {
    items / producers + usize::from(producer < items % producers)
}

fn fifo(config: &GlobalConfig) -> anyhow::Result<(usize, bool, bool)> {
    let dispatcher = Dispatcher::with_options("demo-fifo", config.options.clone())?;
    let probe = Arc::new(Probe::default());
    let log: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..config.producers)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let probe = probe.clone();
            let log = log.clone();
            let count = share(config.items, config.producers, producer);
            thread::spawn(move || -> apartment::Result<()> {
                for seq in 0..count {
                    let probe = probe.clone();
                    let log = log.clone();
                    dispatcher.post(move || {
                        probe.enter();
                        log.lock().unwrap().push((producer, seq));
                        probe.leave();
                    })?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }
    dispatcher.dispose()?;

    let log = log.lock().unwrap();
    let ordered = (0..config.producers).all(|producer| {
        log.iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .eq(0..share(config.items, config.producers, producer))
    });
    Ok((log.len(), ordered, probe.overlapped.load(Ordering::SeqCst)))
}

fn indexed(config: &GlobalConfig) -> anyhow::Result<(usize, bool, bool)> {
    let dispatcher = IndexedDispatcher::with_options("demo-indexed", config.options.clone())?;
    let probe = Arc::new(Probe::default());
    let log: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    // producer p submits p, p + producers, ... from the highest index down
    let handles: Vec<_> = (0..config.producers)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let probe = probe.clone();
            let log = log.clone();
            let (items, producers) = (config.items, config.producers);
            thread::spawn(move || -> apartment::Result<()> {
                let mine: Vec<i64> = (producer..items).step_by(producers).map(|i| i as i64).collect();
                for index in mine.into_iter().rev() {
                    let probe = probe.clone();
                    let log = log.clone();
                    let _ = dispatcher.invoke_async(index, move || {
                        probe.enter();
                        log.lock().unwrap().push(index);
                        probe.leave();
                    })?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }
    dispatcher.dispose()?;

    let log = log.lock().unwrap();
    let ordered = log.iter().copied().eq(0..config.items as i64);
    Ok((log.len(), ordered, probe.overlapped.load(Ordering::SeqCst)))
}

fn events(config: &GlobalConfig) -> anyhow::Result<(usize, bool, bool)> {
    let dispatcher = Dispatcher::with_options("demo-events", config.options.clone())?;
    let event = TaskResetEvent::new(dispatcher.clone());

    // even keys are signalled before anyone waits, odd keys afterwards
    for key in (0..config.items).step_by(2) {
        block_on(event.set_async(key))?;
    }
    let waiters: Vec<_> = (0..config.items).map(|key| event.wait_async(key)).collect();

    let setter = event.clone();
    let items = config.items;
    let late = thread::spawn(move || -> apartment::Result<()> {
        for key in (1..items).step_by(2) {
            block_on(setter.set_async(key))?;
        }
        Ok(())
    });

    let mut released = 0;
    for waiter in waiters {
        block_on(waiter)?;
        released += 1;
    }
    late.join()
        .map_err(|_| anyhow::anyhow!("setter thread panicked"))??;
    dispatcher.dispose()?;
    Ok((released, true, false))
}

fn drain(config: &GlobalConfig) -> anyhow::Result<(usize, bool, bool)> {
    let dispatcher = Dispatcher::with_options("demo-drain", config.options.clone())?;
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..config.items {
        let count = count.clone();
        dispatcher.post(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })?;
    }
    debug!("{} items queued before dispose", dispatcher.pending());

    let disposer = dispatcher.clone();
    thread::spawn(move || disposer.dispose())
        .join()
        .map_err(|_| anyhow::anyhow!("disposer thread panicked"))??;

    let refused = dispatcher.post(|| ()).is_err();
    Ok((count.load(Ordering::SeqCst), refused, false))
}

fn spawned(config: &GlobalConfig) -> anyhow::Result<(usize, bool, bool)> {
    let dispatcher = Dispatcher::with_options("demo-async", config.options.clone())?;
    let worker = dispatcher.owner_thread();

    let mut triggers = Vec::with_capacity(config.items);
    let mut operations = Vec::with_capacity(config.items);
    for _ in 0..config.items {
        let (tx, rx) = oneshot::channel::<()>();
        triggers.push(tx);
        operations.push(dispatcher.spawn(move || async move {
            let before = thread::current().id();
            let _ = rx.await;
            before == thread::current().id()
        })?);
    }

    let releaser = thread::spawn(move || {
        for tx in triggers {
            let _ = tx.send(());
        }
    });

    let mut resumed_on_worker = 0;
    for operation in operations {
        if operation.wait().context("spawned task did not finish")? {
            resumed_on_worker += 1;
        }
    }
    releaser
        .join()
        .map_err(|_| anyhow::anyhow!("releaser thread panicked"))?;
    let probe = dispatcher.clone();
    let on_worker = dispatcher.invoke(move || probe.check_access())?;
    dispatcher.dispose()?;
    Ok((
        resumed_on_worker,
        on_worker && Dispatcher::from_thread(worker).is_none(),
        false,
    ))
}
