//! # Kernel synchronization primitives
//!
//! - [`SpinLock`]: a named test-and-test-and-set spinning lock for short,
//!   non-blocking critical sections such as allocator bookkeeping.
//! - [`SyncOnceCell`]: a write-once slot for kernel-lifetime singletons that
//!   are constructed during boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::{OnceInitError, SyncOnceCell};
