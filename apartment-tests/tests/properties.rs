// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use apartment::{Dispatcher, DispatcherError, IndexedDispatcher, TaskResetEvent};
use apartment_tests::probe::ConcurrencyProbe;
use apartment_tests::test_log::ExecutionLog;
use futures::executor::block_on;
use futures::FutureExt;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn fifo_per_producer_and_single_worker_thread() {
    init_logging();
    let dispatcher = Dispatcher::new("fifo-property").unwrap();
    let log = ExecutionLog::new();

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let log = log.clone();
            thread::spawn(move || {
                for seq in 0..100 {
                    let log = log.clone();
                    let _ = dispatcher
                        .invoke_async(move || log.record(producer, seq))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    dispatcher.dispose().unwrap();

    let snapshot = log.snapshot();
    assert_eq!(snapshot.executions.len(), 400);
    for producer in 0..4 {
        assert_eq!(snapshot.sequence(Some(producer)), (0..100).collect::<Vec<_>>());
    }
    assert!(snapshot.single_thread());
    assert!(log.to_json().unwrap().contains("\"producer\": 3"));
}

#[test]
fn fifo_single_producer_total_order() {
    let dispatcher = Dispatcher::new("fifo-total").unwrap();
    let log = ExecutionLog::new();
    let ops: Vec<_> = (0..250)
        .map(|seq| {
            let log = log.clone();
            dispatcher.invoke_async(move || log.record(0, seq)).unwrap()
        })
        .collect();
    for op in ops {
        op.wait().unwrap();
    }
    assert_eq!(log.snapshot().sequence(None), (0..250).collect::<Vec<_>>());
    dispatcher.dispose().unwrap();
}

#[test]
fn mutual_exclusion_under_contention() {
    let dispatcher = Dispatcher::new("exclusion-property").unwrap();
    let probe = ConcurrencyProbe::new();

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            let probe = probe.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let probe = probe.clone();
                    dispatcher
                        .invoke(move || {
                            let _guard = probe.enter();
                            thread::yield_now();
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    dispatcher.dispose().unwrap();
    assert_eq!(probe.peak(), 1);
}

#[test]
fn reentrant_invoke_runs_inline_and_keeps_other_items_in_order() {
    let dispatcher = Dispatcher::new("reentrancy-property").unwrap();
    let log = ExecutionLog::new();

    let outer = dispatcher.clone();
    let outer_log = log.clone();
    let first = dispatcher
        .invoke_async(move || {
            outer_log.record(0, 0);
            let nested_log = outer_log.clone();
            outer.invoke(move || nested_log.record(1, 1)).unwrap();
            outer_log.record(0, 2);
        })
        .unwrap();
    let later: Vec<_> = (3..6)
        .map(|seq| {
            let log = log.clone();
            dispatcher.invoke_async(move || log.record(2, seq)).unwrap()
        })
        .collect();

    first.wait().unwrap();
    for op in later {
        op.wait().unwrap();
    }
    assert_eq!(log.snapshot().sequence(None), vec![0, 1, 2, 3, 4, 5]);
    dispatcher.dispose().unwrap();
}

#[test]
fn indexed_strict_ordering() {
    let dispatcher = IndexedDispatcher::new("indexed-property").unwrap();
    let log = ExecutionLog::new();

    let ops: Vec<_> = [2i64, 0, 1]
        .into_iter()
        .map(|index| {
            let log = log.clone();
            dispatcher
                .invoke_async(index, move || log.record(0, index))
                .unwrap()
        })
        .collect();
    for op in ops {
        op.wait().unwrap();
    }
    assert_eq!(log.snapshot().sequence(None), vec![0, 1, 2]);
    dispatcher.dispose().unwrap();
}

#[test]
fn indexed_missing_index_stalls_the_worker() {
    let dispatcher = IndexedDispatcher::new("indexed-stall").unwrap();
    let log = ExecutionLog::new();
    let submit = |index: i64| {
        let log = log.clone();
        dispatcher
            .invoke_async(index, move || log.record(0, index))
            .unwrap()
    };

    let five = submit(5);
    let early: Vec<_> = [3, 0, 2, 1].into_iter().map(submit).collect();
    for op in early {
        op.wait().unwrap();
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(log.snapshot().sequence(None), vec![0, 1, 2, 3]);
    assert_eq!(dispatcher.next_index(), 4);

    submit(4).wait().unwrap();
    five.wait().unwrap();
    assert_eq!(log.snapshot().sequence(None), vec![0, 1, 2, 3, 4, 5]);
    dispatcher.dispose().unwrap();
}

#[test]
fn dispose_drains_one_hundred_items() {
    let dispatcher = Dispatcher::new("drain-property").unwrap();
    let log = ExecutionLog::new();
    let (exited_tx, exited_rx) = mpsc::channel();
    let exited_log = log.clone();
    dispatcher.add_disposed_handler(move || exited_tx.send(exited_log.len()).unwrap());

    for seq in 0..100 {
        let log = log.clone();
        dispatcher
            .post(move || {
                thread::sleep(Duration::from_micros(100));
                log.record(0, seq);
            })
            .unwrap();
    }

    let disposer = dispatcher.clone();
    thread::spawn(move || disposer.dispose())
        .join()
        .unwrap()
        .unwrap();

    // everything ran before dispose returned and before the worker exited
    assert_eq!(log.len(), 100);
    assert_eq!(exited_rx.recv().unwrap(), 100);
    assert!(dispatcher.is_disposed());
}

#[test]
fn task_reset_event_set_before_wait() {
    let dispatcher = Dispatcher::new("event-property").unwrap();
    let event = TaskResetEvent::new(dispatcher.clone());

    let setter = event.clone();
    dispatcher
        .invoke(move || setter.set(["k"]))
        .unwrap()
        .unwrap();
    block_on(event.wait_async("k")).unwrap();
    dispatcher.dispose().unwrap();
}

#[test]
fn task_reset_event_wait_before_set() {
    let dispatcher = Dispatcher::new("event-property-late").unwrap();
    let event = TaskResetEvent::new(dispatcher.clone());

    let mut waiter = event.wait_async("k");
    dispatcher.invoke(|| ()).unwrap();
    assert!((&mut waiter).now_or_never().is_none());

    block_on(event.set_async("k")).unwrap();
    block_on(waiter).unwrap();
    dispatcher.dispose().unwrap();
}

#[test]
fn double_dispose_fails_and_keeps_state() {
    let dispatcher = Dispatcher::new("double-dispose").unwrap();
    dispatcher.dispose().unwrap();
    assert!(matches!(
        dispatcher.dispose(),
        Err(DispatcherError::AlreadyDisposed)
    ));
    assert!(dispatcher.is_disposed());
    assert!(matches!(
        dispatcher.invoke(|| ()),
        Err(DispatcherError::OperationCancelled)
    ));

    let indexed = IndexedDispatcher::new("double-dispose-indexed").unwrap();
    indexed.dispose().unwrap();
    assert!(matches!(
        indexed.dispose(),
        Err(DispatcherError::AlreadyDisposed)
    ));
    assert!(indexed.is_disposed());
}

#[test]
fn verify_access_is_owner_only() {
    let dispatcher = Dispatcher::new("access-property").unwrap();
    for _ in 0..3 {
        let foreign = dispatcher.clone();
        let result = thread::spawn(move || foreign.verify_access()).join().unwrap();
        assert!(matches!(
            result,
            Err(DispatcherError::IllegalCrossThreadAccess { .. })
        ));
    }
    let owner = dispatcher.clone();
    assert!(dispatcher.invoke(move || owner.verify_access()).unwrap().is_ok());
    dispatcher.dispose().unwrap();
}
