//! The lock-free MPMC FIFO queue (spec §4.3–§4.6): Michael-Scott with a
//! dummy node and an explicit single-bit reclamation handshake between the
//! dequeuer and the caller's release path (spec §4.4).
//!
//! Every `head`/`tail`/node-`link` cell is a [`TaggedCell`] rather than a
//! plain pointer — the counter half is what makes the queue's CAS loops
//! ABA-safe (spec §3), and for node links specifically, bit 63 of that same
//! counter doubles as the handshake bit (spec §4.4).

use crate::tagged::{TaggedCell, Tp};
use core::ptr::NonNull;
use crossbeam::utils::CachePadded;
use log::{debug, error};

/// An intrusive queue node: a [`TaggedCell`] `next` link plus a caller
/// payload. Every node — including the queue's own dummy — is one of
/// these; the dummy is just a node the caller handed to [`Queue::new`]
/// instead of [`Queue::enqueue`] (spec §6 `init` takes "an initial dummy
/// node" as caller-supplied input, the same way every other node is
/// caller-allocated).
pub struct Node<T> {
    link: TaggedCell,
    payload: T,
}

impl<T> Node<T> {
    /// spec §6 `element_init`: allocate and initialize a fresh node. The
    /// returned box's raw pointer is what [`Queue::new`]/[`Queue::enqueue`]
    /// expect.
    pub fn new(payload: T) -> Box<Self> {
        Box::new(Node {
            link: TaggedCell::new(Tp::null()),
            payload,
        })
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Consumes the node, handing back the payload.
    pub fn into_payload(self: Box<Self>) -> T {
        self.payload
    }

    /// Pool-reuse path (spec §6): clear the link back to a fresh, unlinked
    /// state so a previously-dequeued-and-released node can be re-enqueued.
    pub fn reset_link(&mut self) {
        self.link.store(Tp::null());
    }

    /// Pool-reuse path: overwrite the payload of a node that's been pulled
    /// back out of a free list (after [`Node::reset_link`]) rather than
    /// freshly allocated via [`Node::new`].
    pub fn set_payload(&mut self, payload: T) {
        self.payload = payload;
    }

    fn link_next(&self, next: Option<NonNull<Node<T>>>, ctr: u64) {
        let addr = next.map_or(0, addr_of);
        self.link.store(Tp::new(addr, ctr));
    }

    /// Chain-building helper for [`Queue::enqueue_chain`]: link this node
    /// to `next` (or null-terminate it with `None`) before the whole chain
    /// is visible to any queue. Only valid on nodes not yet handed to
    /// `enqueue`/`enqueue_chain`.
    pub fn link_to(&self, next: Option<NonNull<Node<T>>>) {
        self.link_next(next, 0);
    }
}

fn addr_of<T>(ptr: NonNull<Node<T>>) -> u64 {
    ptr.as_ptr() as u64
}

fn node_ptr<T>(addr: u64) -> Option<NonNull<Node<T>>> {
    NonNull::new(addr as *mut Node<T>)
}

/// Safety: `addr` is either 0 or a value this module itself previously
/// produced via `addr_of` from a live `NonNull<Node<T>>`.
unsafe fn node_ref<'a, T>(ptr: NonNull<Node<T>>) -> &'a Node<T> {
    &*ptr.as_ptr()
}

fn assert_fresh_node<T>(node: NonNull<Node<T>>) {
    if node.as_ptr() as usize % 16 != 0 {
        error!("queue node {:p} is not 16-byte aligned", node.as_ptr());
        panic!("queue node must be 16-byte aligned");
    }
    let link = unsafe { node_ref(node) }.link.load();
    if link.handshake_bit() {
        error!(
            "node {:p} re-enqueued with handshake bit still set",
            node.as_ptr()
        );
        panic!("node's handshake bit must be clear before (re-)enqueue");
    }
}

struct ReleaseSlot<T> {
    callback: Box<dyn Fn(NonNull<Node<T>>) + Send + Sync>,
}

/// A lock-free MPMC FIFO queue (spec §2/§4.3). Built on the Michael-Scott
/// algorithm: a dummy node always occupies `head`, and the node a caller
/// reads out of `dequeue` used to be `head`'s payload-bearing neighbor,
/// becoming the new dummy.
pub struct Queue<T> {
    release_slot: CachePadded<ReleaseSlot<T>>,
    head: CachePadded<TaggedCell>,
    tail: CachePadded<TaggedCell>,
}

// SAFETY: every reachable node is only ever touched through the atomic
// `head`/`tail`/link cells; `T: Send` is what's needed to move payloads
// between the threads that enqueue and the threads that dequeue/release.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// spec §6 `init`: install `dummy` as both `head` and `tail`. The
    /// dummy is caller-supplied like any other node (typically via
    /// [`Node::new`] then `Box::into_raw`/`NonNull::new`) — it must not
    /// already be linked into anything. Its handshake bit is armed here,
    /// not by the caller, because the dummy never reaches a user's
    /// [`Queue::release`] call: a single toggle from the dequeuer side is
    /// enough to reclaim it (spec §4.4).
    ///
    /// `release` is the caller-supplied reclamation callback (spec §6
    /// `element_release`'s callback + opaque-argument pair, collapsed into
    /// one closure — the closure's captures are the opaque argument).
    pub fn new<F>(dummy: NonNull<Node<T>>, release: F) -> Self
    where
        F: Fn(NonNull<Node<T>>) + Send + Sync + 'static,
    {
        assert_fresh_node(dummy);
        unsafe { node_ref(dummy) }
            .link
            .store(Tp::new(0, crate::tagged::HANDSHAKE_BIT));
        let addr = addr_of(dummy);
        debug!("queue::new dummy={:#x}", addr);
        Queue {
            release_slot: CachePadded::new(ReleaseSlot {
                callback: Box::new(release),
            }),
            head: CachePadded::new(TaggedCell::new(Tp::new(addr, 0))),
            tail: CachePadded::new(TaggedCell::new(Tp::new(addr, 0))),
        }
    }

    /// spec §4.3: the shared enqueue loop behind both `enqueue` and
    /// `enqueue_chain`. `first`/`last` bound a null-terminated chain of
    /// `count` already-linked nodes; `last`'s own link is stamped with the
    /// tail's counter immediately before the publishing CAS.
    fn enqueue_impl(&self, first: NonNull<Node<T>>, last: NonNull<Node<T>>, count: u64) -> u64 {
        loop {
            let t = self.tail.load();
            // SAFETY: `t.ptr()` is always a live node — either the dummy
            // from `new`, or a node most recently published by a successful
            // enqueue CAS below, never freed while reachable from `tail`.
            let tail_node = unsafe { node_ref::<T>(node_ptr(t.ptr()).unwrap()) };
            let next = tail_node.link.load();
            // Re-check tail hasn't moved since we read it (spec §4.3 "Case
            // A"/"Case B" distinction hinges on this).
            if t != self.tail.load() {
                continue;
            }
            if next.is_null() {
                // Case A: tail really is the last node. Stamp our chain's
                // tail link with tail's own counter, then try to publish.
                unsafe { node_ref::<T>(last) }.link_next(None, t.ctr());
                if tail_node
                    .link
                    .compare_exchange(next, addr_of(first), 1)
                    .is_ok()
                {
                    // Best-effort tail advance; another thread may beat us
                    // to it, which is fine (spec §4.3).
                    let _ = self.tail.compare_exchange(t, addr_of(last), count);
                    // spec §4.3: "returns the current upper-bound queue
                    // length", i.e. tail.ctr - head.ctr, not the bare tail
                    // counter — head may have advanced past 0 by the time
                    // this enqueue lands.
                    return (t.ctr() + count).wrapping_sub(self.head.load().ctr());
                }
            } else {
                // Case B: tail is lagging behind the real last node. Help
                // advance it, then retry from scratch.
                let _ = self.tail.compare_exchange(t, next.ptr(), 1);
            }
        }
    }

    /// spec §6 `enqueue`: publish a single fresh node.
    pub fn enqueue(&self, node: NonNull<Node<T>>) -> u64 {
        assert_fresh_node(node);
        assert_eq!(
            unsafe { node_ref(node) }.link.load().ptr(),
            0,
            "node must not already be linked"
        );
        self.enqueue_impl(node, node, 1)
    }

    /// spec §6 `enqueue_multi`: publish a pre-built, null-terminated chain of
    /// `first..=last` nodes in one CAS, where `last` is discovered by
    /// walking the chain.
    pub fn enqueue_chain(&self, first: NonNull<Node<T>>) -> u64 {
        let mut count = 1u64;
        let mut last = first;
        assert_fresh_node(first);
        loop {
            let next = unsafe { node_ref(last) }.link.load();
            if next.is_null() {
                break;
            }
            last = node_ptr(next.ptr()).expect("chain link must not be dangling");
            assert_fresh_node(last);
            count += 1;
        }
        self.enqueue_impl(first, last, count)
    }

    /// spec §4.4 `dequeue`. Returns `None` on an empty queue; otherwise
    /// returns the node that is now the new dummy, with ownership of the
    /// reclamation handshake transferred to the caller via [`Queue::release`].
    pub fn dequeue(&self) -> Option<NonNull<Node<T>>> {
        loop {
            let h = self.head.load();
            let t = self.tail.load();
            // SAFETY: `h.ptr()` is always a live node for the same reason as
            // in `enqueue_impl`.
            let head_node = unsafe { node_ref::<T>(node_ptr(h.ptr()).unwrap()) };
            let next = head_node.link.load();
            if h != self.head.load() {
                continue;
            }
            if next.is_null() {
                return None;
            }
            if h.ptr() == t.ptr() {
                // Tail is lagging; help it catch up and retry.
                let _ = self.tail.compare_exchange(t, next.ptr(), 1);
                continue;
            }
            if self.head.compare_exchange(h, next.ptr(), 1).is_ok() {
                let old_head = node_ptr::<T>(h.ptr()).unwrap();
                self.dequeuer_release(old_head);
                return Some(next_node_handle(next));
            }
        }
    }

    /// The dequeuer's half of the handshake (spec §4.4): flip the old head's
    /// handshake bit. If the caller's `release` already arrived first (bit
    /// was already set), reclaim now; otherwise the caller's own later call
    /// to [`Queue::release`] will observe the flipped bit and reclaim
    /// instead. [`Queue::new`] pre-arms this bit on the initial dummy, so
    /// the very first old head — which no caller ever calls `release` on,
    /// because `dequeue` never hands it out — is reclaimed here directly.
    fn dequeuer_release(&self, old_head: NonNull<Node<T>>) {
        if unsafe { node_ref(old_head) }.link.fetch_xor_handshake() {
            self.reclaim(old_head);
        }
    }

    /// spec §6 `element_release`: the caller's half of the handshake. Call
    /// this exactly once per node returned from `dequeue`, once the caller
    /// is done reading its payload.
    pub fn release(&self, node: NonNull<Node<T>>) {
        if unsafe { node_ref(node) }.link.fetch_xor_handshake() {
            self.reclaim(node);
        }
    }

    fn reclaim(&self, node: NonNull<Node<T>>) {
        (self.release_slot.callback)(node);
    }

    /// spec §6 `empty`: advisory-only snapshot (spec §9 Open Question —
    /// true emptiness can change between the read and the caller's next
    /// action in any concurrent consumer).
    pub fn is_empty(&self) -> bool {
        let h = self.head.load();
        let head_node = unsafe { node_ref::<T>(node_ptr(h.ptr()).unwrap()) };
        head_node.link.load().is_null()
    }

    /// spec §6 `queued`: an upper bound on the number of elements currently
    /// in the queue, derived from the tail/head counter gap.
    pub fn queued(&self) -> u64 {
        self.tail.load().ctr().wrapping_sub(self.head.load().ctr())
    }
}

/// Builds a typed handle back out of a `Tp` already known to be non-null.
fn next_node_handle<T>(tp: Tp) -> NonNull<Node<T>> {
    node_ptr(tp.ptr()).expect("handshake-bearing link must be a live node address")
}

impl<T> Drop for Queue<T> {
    /// spec §4.6 teardown: the precondition is that no concurrent
    /// enqueue/dequeue/release is in flight, so this drains the whole chain
    /// unconditionally, ignoring the handshake bit entirely — there is no
    /// "other party" left to race with. Every drained node, including the
    /// live dummy, is handed to the caller's own release callback rather
    /// than freed here directly: the callback is the only party that knows
    /// whether a node is a `Box` to drop, a slot to return to a pool, or an
    /// address in shared memory outside this process's allocator (spec §5
    /// "Cross-process use").
    fn drop(&mut self) {
        let mut cursor = node_ptr::<T>(self.head.load().ptr());
        let mut drained = 0u64;
        while let Some(ptr) = cursor {
            let next = unsafe { node_ref(ptr) }.link.load();
            self.reclaim(ptr);
            cursor = node_ptr(next.ptr());
            drained += 1;
        }
        debug!("queue::drop drained={}", drained);
    }
}
