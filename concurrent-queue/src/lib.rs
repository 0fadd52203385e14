//! A lock-free MPMC FIFO queue and LIFO stack, both built on a tagged
//! `(pointer, counter)` double-wide CAS primitive.
//!
//! The queue is Michael & Scott's algorithm ("Simple, Fast, and Practical
//! Non-Blocking and Blocking Concurrent Queue Algorithms", PODC 1996): a
//! dummy node always occupies the head, `enqueue` links at the tail with a
//! single CAS, and `dequeue` unlinks at the head with a single CAS. The
//! stack is the matching Treiber LIFO built on the same tagged-cell
//! primitive.
//!
//! Both structures are intrusive: the caller owns node storage (no
//! allocator lives inside this crate) and is responsible for eventually
//! reclaiming it. The queue in particular defers reclamation of a dequeued
//! node until both the dequeuer and the caller have signaled they're done
//! with it — see [`queue::Queue::release`] and the module docs on
//! [`queue`] for the handshake protocol this requires.
//!
//! # Example
//!
//! ```
//! use concurrent_queue::queue::{Node, Queue};
//! use std::ptr::NonNull;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let freed = Arc::new(AtomicUsize::new(0));
//! let freed_in_callback = freed.clone();
//! let dummy = NonNull::new(Box::into_raw(Node::new(0))).unwrap();
//! let queue = Queue::new(dummy, move |node: NonNull<Node<i32>>| {
//!     freed_in_callback.fetch_add(1, Ordering::SeqCst);
//!     drop(unsafe { Box::from_raw(node.as_ptr()) });
//! });
//!
//! let node = NonNull::new(Box::into_raw(Node::new(42))).unwrap();
//! queue.enqueue(node);
//!
//! let dequeued = queue.dequeue().unwrap();
//! assert_eq!(*unsafe { dequeued.as_ref() }.payload(), 42);
//! queue.release(dequeued);
//! ```

pub mod queue;
pub mod stack;
pub(crate) mod sync;
pub(crate) mod tagged;

pub use queue::{Node, Queue};
pub use stack::{Stack, StackNode};
