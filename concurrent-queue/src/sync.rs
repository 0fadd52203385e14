//! Atomic-type indirection so the single-pointer stack can be exercised
//! under `loom` as well as under real threads.
//!
//! The queue's tagged cell is backed by `portable_atomic::AtomicU128`, which
//! `loom` does not model, so only the stack (plain `AtomicU64` links) routes
//! through this shim. See DESIGN.md for why the queue is excluded.

#[cfg(loom)]
pub use loom::sync::atomic::{AtomicU64, Ordering};

#[cfg(not(loom))]
pub use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(loom)]
pub use loom::thread;

#[cfg(not(loom))]
pub use std::thread;
