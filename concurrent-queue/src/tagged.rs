//! The tagged-pointer double-wide CAS primitive (spec §3 "Tagged pointer
//! (TP)", §4.1).
//!
//! A `Tp` is a `(ptr, ctr)` pair: `ptr` is a 64-bit address (0 == null) and
//! `ctr` is a 64-bit monotonic counter. The pair is packed into a single
//! 128-bit word — low 64 bits hold `ptr`, high 64 bits hold `ctr` — and
//! stored in a `portable_atomic::AtomicU128` so the whole pair can be read,
//! compared, and XOR'd as one atomic unit.
//!
//! `std::sync::atomic::AtomicU128` exists only behind a nightly feature
//! gate; `portable_atomic` gives the same API on stable, falling back to a
//! striped-lock implementation on targets without a native 128-bit CAS. See
//! DESIGN.md for why this crate took that dependency instead of narrowing
//! the tag to 48+16 bits the way spec §9 allows.

use core::fmt;
use portable_atomic::{AtomicU128, Ordering};

/// Bit 63 of the counter half; the reclamation handshake bit from spec §4.4.
pub(crate) const HANDSHAKE_BIT: u64 = 1 << 63;

/// Bits 0-62 of the counter half; the ABA disambiguator from spec §3.
const ABA_MASK: u64 = HANDSHAKE_BIT - 1;

/// An unpacked `(ptr, ctr)` pair. Cheap to copy; the packed form only exists
/// inside the atomic cell.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tp {
    ptr: u64,
    ctr: u64,
}

impl Tp {
    pub(crate) const fn new(ptr: u64, ctr: u64) -> Self {
        Tp { ptr, ctr }
    }

    pub(crate) const fn null() -> Self {
        Tp { ptr: 0, ctr: 0 }
    }

    pub(crate) fn is_null(self) -> bool {
        self.ptr == 0
    }

    pub(crate) fn ptr(self) -> u64 {
        self.ptr
    }

    pub(crate) fn ctr(self) -> u64 {
        self.ctr
    }

    /// Bit 63 of the counter half: the reclamation handshake bit (queue
    /// nodes only; stack/head/tail cells don't partition their counter).
    pub(crate) fn handshake_bit(self) -> bool {
        self.ctr & HANDSHAKE_BIT != 0
    }

    /// Bits 0-62: the ABA disambiguator used when `ptr` is null.
    pub(crate) fn aba_counter(self) -> u64 {
        self.ctr & ABA_MASK
    }

    fn to_word(self) -> u128 {
        ((self.ctr as u128) << 64) | (self.ptr as u128)
    }

    fn from_word(word: u128) -> Self {
        Tp {
            ptr: word as u64,
            ctr: (word >> 64) as u64,
        }
    }
}

impl fmt::Debug for Tp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tp")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("ctr", &self.ctr)
            .finish()
    }
}

/// A 16-byte-aligned atomic `(ptr, ctr)` cell — the substrate every head,
/// tail, and `next` field in this crate is built from (spec §3, §5 "Shared
/// resource policy").
///
/// `#[repr(align(16))]` is asserted explicitly rather than relied upon
/// implicitly from `AtomicU128`'s own alignment, because spec §5 makes
/// 16-byte alignment a hard correctness requirement (undefined behavior on
/// violation), not just a performance hint.
#[repr(align(16))]
pub(crate) struct TaggedCell {
    word: AtomicU128,
}

impl TaggedCell {
    pub(crate) fn new(initial: Tp) -> Self {
        debug_assert_eq!(core::mem::align_of::<Self>(), 16);
        TaggedCell {
            word: AtomicU128::new(initial.to_word()),
        }
    }

    /// Memory ordering is fixed at `Acquire`/`AcqRel` rather than
    /// caller-selectable: spec §4.1 only requires "a full memory fence", and
    /// keeping the ordering internal avoids mixing this primitive's
    /// `portable_atomic::Ordering` with the loom-swappable `Ordering` used
    /// by the stack's plain `next` links (see `crate::sync`).
    pub(crate) fn load(&self) -> Tp {
        Tp::from_word(self.word.load(Ordering::Acquire))
    }

    /// A plain (non-CAS) store. Only safe to use before a cell is visible
    /// to more than one thread — chain construction ahead of
    /// `enqueue_chain`, or stamping a brand-new node's link (spec §4.3 step
    /// 3a) before the CAS that publishes it.
    pub(crate) fn store(&self, tp: Tp) {
        self.word.store(tp.to_word(), Ordering::Relaxed);
    }

    /// spec §4.1: atomically replace the cell with `(new_ptr, expected.ctr +
    /// inc)` iff the cell still equals `expected`. `inc` must be positive —
    /// every successful mutation must advance the counter so a retried
    /// observer can't mistake stale state for current state (ABA).
    pub(crate) fn compare_exchange(&self, expected: Tp, new_ptr: u64, inc: u64) -> Result<Tp, Tp> {
        debug_assert!(inc > 0, "tagged CAS increment must be positive");
        let new = Tp {
            ptr: new_ptr,
            ctr: expected.ctr.wrapping_add(inc),
        };
        match self
            .word
            .compare_exchange(expected.to_word(), new.to_word(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(new),
            Err(actual) => Err(Tp::from_word(actual)),
        }
    }

    /// spec §4.4's two-party rendezvous: flip bit 63 of the counter half
    /// (overall bit 127 of the packed word) and report whether the *other*
    /// party had already arrived (the pre-flip bit was set). Needs no CAS
    /// loop — a single atomic XOR, exactly as the spec describes it.
    pub(crate) fn fetch_xor_handshake(&self) -> bool {
        const MASK: u128 = 1u128 << 127;
        let prev = self.word.fetch_xor(MASK, Ordering::AcqRel);
        (prev & MASK) != 0
    }
}

impl fmt::Debug for TaggedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaggedCell").field(&self.load()).finish()
    }
}
