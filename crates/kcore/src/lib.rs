//! Core types and synchronization primitives shared across the kernel.
//!
//! Mirrors the teacher crate's split: everything here is host-testable
//! (`cargo test` runs these modules under `std`) so the algorithms that
//! matter — locking, address arithmetic, error classification — can be
//! exercised without a kernel target.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod addr;
pub mod cpu_local;
pub mod error;
pub mod log;
pub mod sched_hooks;
pub mod static_assert;
pub mod sync;
