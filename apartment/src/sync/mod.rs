// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Synchronization built on confinement to a dispatcher thread instead of locks.

pub mod confined;
pub mod task_reset_event;
