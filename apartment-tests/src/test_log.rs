// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggedExecution {
    pub producer: usize,

    pub seq: i64,

    /// Debug rendering of the executing thread's id.
    pub thread: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TestLog {
    pub executions: Vec<LoggedExecution>,
}

impl TestLog {
    /// Sequence numbers in execution order, optionally for one producer only.
    pub fn sequence(&self, producer: Option<usize>) -> Vec<i64> {
        self.executions
            .iter()
            .filter(|e| producer.map_or(true, |p| e.producer == p))
            .map(|e| e.seq)
            .collect()
    }

    /// Whether every recorded execution happened on the same thread.
    pub fn single_thread(&self) -> bool {
        self.executions
            .windows(2)
            .all(|pair| pair[0].thread == pair[1].thread)
    }
}

/// Shared recorder handed into work items.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    inner: Arc<Mutex<TestLog>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, producer: usize, seq: i64) {
        let entry = LoggedExecution {
            producer,
            seq,
            thread: format!("{:?}", thread::current().id()),
        };
        self.inner
            .lock()
            .expect("execution log poisoned")
            .executions
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("execution log poisoned").executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> TestLog {
        TestLog {
            executions: self
                .inner
                .lock()
                .expect("execution log poisoned")
                .executions
                .clone(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}
