// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Serialized Job Execution
//!
//! ## Overview
//! Every dispatcher owns one queue of jobs and exactly one thread that drains it.
//!
//! - Any thread may enqueue; only the owning thread dequeues and executes.
//! - The queue is unbounded (no backpressure) and strictly FIFO.
//! - Closing the queue stops acceptance but keeps queued jobs receivable,
//!   so shutdown drains instead of discarding.
//! - A panicking job is logged and swallowed; the loop keeps going.
//! - Futures spawned onto a dispatcher live in thread-local storage of the
//!   owning thread; each wake-up is queued as a regular job.
//!
//! ```text
//!         +-------------+  +-------------+  +-------------+
//!         |  thread A   |  |  thread B   |  |  waker      |
//!         +------+------+  +------+------+  +------+------+
//!                |                |                |
//!                v                v                v
//!         +------+----------------+----------------+------+
//!         |             Scheduler (MPSC FIFO)             |
//!         +-----------------------+-----------------------+
//!                                 |
//!                        +--------v--------+
//!                        |  owning thread  |
//!                        |  run_job() loop |
//!                        +-----------------+
//! ```

pub mod closure_job;
pub mod job;
pub(crate) mod local_task;
pub mod scheduler;
