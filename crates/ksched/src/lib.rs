//! Classic preemptive process model: task control blocks, the dual
//! MLFQ/Fair run-queue classes, the sleep and hrtimer queues, the
//! dispatcher, and signal delivery.
//!
//! Host-testable like the other core crates; the kernel binary drives
//! `scheduler_tick` from the timer IRQ and wires `talon_core::sched_hooks`
//! to real context switches at boot.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod fair;
pub mod hrtimer;
pub mod mlfq;
pub mod sched;
pub mod signal;
pub mod sleep;
pub mod task;

pub use task::{Pid, Task, TaskState};
