//! The lock-free Treiber stack (spec §4.2): a single tagged `head`, plain
//! (untagged) `next` links on each node. The ABA guard lives entirely on the
//! head counter, so node links don't need the tagged cell the queue uses.
//!
//! Built on [`crate::sync`] rather than `core::sync::atomic` directly so
//! this module can be model-checked with `loom` (see DESIGN.md).

use crate::sync::{AtomicU64, Ordering};
use crate::tagged::{TaggedCell, Tp};
use core::marker::PhantomData;
use core::ptr::NonNull;
use crossbeam::utils::CachePadded;
use log::debug;

/// An intrusive stack node. The stack only ever touches `next`; the payload
/// is the caller's to read and mutate whenever the node isn't currently
/// linked into a stack (spec §5 "Shared resource policy").
pub struct StackNode<T> {
    next: AtomicU64,
    payload: T,
}

impl<T> StackNode<T> {
    /// spec §6 `element_init`, stack flavor: allocate and initialize a
    /// fresh node. The caller hands the returned box's raw pointer to
    /// [`Stack::push`].
    pub fn new(payload: T) -> Box<Self> {
        Box::new(StackNode {
            next: AtomicU64::new(0),
            payload,
        })
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Consumes the node, handing back the payload. Typical use: the last
    /// step of a caller's own reclamation, after `pop` returns the node.
    pub fn into_payload(self: Box<Self>) -> T {
        self.payload
    }
}

fn addr_of<T>(ptr: NonNull<StackNode<T>>) -> u64 {
    ptr.as_ptr() as u64
}

/// Safety: only valid, non-null addresses handed back from this module's
/// own `addr_of` ever round-trip through here.
unsafe fn ptr_of<T>(addr: u64) -> Option<NonNull<StackNode<T>>> {
    NonNull::new(addr as *mut StackNode<T>)
}

/// A lock-free LIFO stack (spec §4.2). `push`/`pop` are intrusive: the
/// caller owns node storage (typically `Box`, reduced to a raw pointer for
/// the call), the stack only ever writes the `next` link.
pub struct Stack<T> {
    head: CachePadded<TaggedCell>,
    _marker: PhantomData<fn(T)>,
}

// SAFETY: all shared mutable state is behind the atomic `head`/`next`
// cells; `T` being `Send` is exactly what's needed to move payloads between
// the threads that push and the threads that pop.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    pub fn new() -> Self {
        debug!("stack::new");
        Stack {
            head: CachePadded::new(TaggedCell::new(Tp::null())),
            _marker: PhantomData,
        }
    }

    /// spec §4.2 `push`: read `head`; link the new node under it; CAS
    /// `head` from the read value to `(node, head.ctr + 1)`; retry on
    /// failure.
    pub fn push(&self, node: NonNull<StackNode<T>>) {
        let addr = addr_of(node);
        loop {
            let head = self.head.load();
            // SAFETY: `node` is a valid, caller-owned allocation not yet
            // linked into this stack (or any other), so writing its `next`
            // field has no concurrent observers.
            unsafe { (*node.as_ptr()).next.store(head.ptr(), Ordering::Relaxed) };
            if self.head.compare_exchange(head, addr, 1).is_ok() {
                return;
            }
        }
    }

    /// spec §4.2 `pop`: read `head`; if null, return absence; otherwise
    /// prefetch `head.ptr->next`; CAS `head` from the read value to `(next,
    /// head.ctr + 1)`; retry on failure; return the prior `head.ptr` on
    /// success.
    pub fn pop(&self) -> Option<NonNull<StackNode<T>>> {
        loop {
            let head = self.head.load();
            if head.is_null() {
                return None;
            }
            // SAFETY: `head.ptr()` was published by a prior successful
            // `push`/`pop` CAS and — per the algorithm's reclamation
            // contract — is only ever freed by a caller that already
            // popped it off this exact stack, which cannot have happened
            // concurrently with our still-in-flight CAS below succeeding.
            let next = unsafe { (*(head.ptr() as *const StackNode<T>)).next.load(Ordering::Acquire) };
            if self.head.compare_exchange(head, next, 1).is_ok() {
                // SAFETY: `head.ptr()` is non-null (checked above) and was
                // just unlinked by our successful CAS.
                return unsafe { ptr_of(head.ptr()) };
            }
        }
    }

    /// spec §4.2 `empty`: observation of `head.ptr == null` — advisory only.
    pub fn is_empty(&self) -> bool {
        self.head.load().is_null()
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}
