//! Resource slots: exclusive-ownership tokens shared by two adjacent seats.
//!
//! A slot is a single `AtomicU64` packing the holder and a generation stamp:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┐
//! │ generation (high 32)     │ holder + 1 (low 32)      │
//! └──────────────────────────┴──────────────────────────┘
//! ```
//!
//! A low half of 0 means free. Every claim and every release bumps the
//! generation, so a reader comparing two loads of the same slot detects any
//! intervening change (including release-then-reclaim by the same seat).
//!
//! There is no blocking primitive here: callers poll `try_claim` with their
//! own backoff, which keeps the acquisition protocol fully responsible for
//! liveness.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Index of a slot in the ring.
pub type SlotId = usize;

const HOLDER_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_ONE: u64 = 1 << 32;

fn holder_of(word: u64) -> Option<usize> {
    match word & HOLDER_MASK {
        0 => None,
        tagged => Some((tagged - 1) as usize),
    }
}

fn next_word(word: u64, holder: Option<usize>) -> u64 {
    let generation = (word & !HOLDER_MASK).wrapping_add(GENERATION_ONE);
    let tagged = holder.map(|h| h as u64 + 1).unwrap_or(0);
    generation | tagged
}

/// One exclusive-ownership token.
#[derive(Debug, Default)]
pub struct Slot {
    word: AtomicU64,
}

impl Slot {
    /// Create a free slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the slot for `claimant` if it is free.
    ///
    /// Returns `false` if the slot is already held by anyone, including the
    /// claimant itself.
    pub fn try_claim(&self, claimant: usize) -> bool {
        let current = self.word.load(Ordering::Acquire);
        if holder_of(current).is_some() {
            return false;
        }
        self.word
            .compare_exchange(
                current,
                next_word(current, Some(claimant)),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Set the slot back to free, unconditionally.
    ///
    /// Callers must only release slots they hold. Returns the previous holder.
    pub fn release(&self) -> Option<usize> {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(next_word(word, None))
            })
            .unwrap_or_else(|word| word);
        holder_of(previous)
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<usize> {
        holder_of(self.word.load(Ordering::Acquire))
    }

    /// Raw word (holder + generation), used to validate snapshots.
    pub(crate) fn stamp(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }
}

/// The fixed ring of slots. Slot `i` is the right slot of seat `i` and the
/// left slot of seat `i + 1`.
#[derive(Debug)]
pub struct SlotRing {
    slots: Vec<Slot>,
}

impl SlotRing {
    /// Create `count` free slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| Slot::new()).collect(),
        }
    }

    /// Atomic compare-and-claim from free to `claimant`.
    pub fn try_claim(&self, slot: SlotId, claimant: usize) -> bool {
        self.slots[slot].try_claim(claimant)
    }

    /// Unconditional release back to free.
    pub fn release(&self, slot: SlotId) -> Option<usize> {
        self.slots[slot].release()
    }

    pub fn holder(&self, slot: SlotId) -> Option<usize> {
        self.slots[slot].holder()
    }

    /// Whether `seat` currently holds `slot`.
    pub fn is_held_by(&self, slot: SlotId, seat: usize) -> bool {
        self.holder(slot) == Some(seat)
    }

    pub(crate) fn stamps(&self) -> Vec<u64> {
        self.slots.iter().map(Slot::stamp).collect()
    }
}

/// Observer view of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub id: SlotId,
    /// Seat holding the slot, `None` when free
    pub holder: Option<usize>,
}

impl SlotSnapshot {
    pub(crate) fn from_stamp(id: SlotId, stamp: u64) -> Self {
        Self {
            id,
            holder: holder_of(stamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_claim_free_slot() {
        let slot = Slot::new();
        assert_eq!(slot.holder(), None);
        assert!(slot.try_claim(3));
        assert_eq!(slot.holder(), Some(3));
    }

    #[test]
    fn test_claim_held_slot_fails() {
        let slot = Slot::new();
        assert!(slot.try_claim(0));
        assert!(!slot.try_claim(1));
        assert!(!slot.try_claim(0), "re-claim by the holder must fail too");
        assert_eq!(slot.holder(), Some(0));
    }

    #[test]
    fn test_release_returns_previous_holder() {
        let slot = Slot::new();
        assert!(slot.try_claim(4));
        assert_eq!(slot.release(), Some(4));
        assert_eq!(slot.holder(), None);
        assert!(slot.try_claim(2));
    }

    #[test]
    fn test_seat_zero_is_distinct_from_free() {
        let slot = Slot::new();
        assert!(slot.try_claim(0));
        assert_eq!(slot.holder(), Some(0));
        assert!(!slot.try_claim(1));
    }

    #[test]
    fn test_generation_changes_on_reclaim_by_same_seat() {
        let slot = Slot::new();
        assert!(slot.try_claim(1));
        let first = slot.stamp();
        slot.release();
        assert!(slot.try_claim(1));
        let second = slot.stamp();
        assert_eq!(holder_of(first), holder_of(second));
        assert_ne!(first, second);
    }

    #[test]
    fn test_ring_ownership() {
        let ring = SlotRing::new(5);
        assert_eq!(ring.stamps().len(), 5);
        assert!(ring.try_claim(4, 4));
        assert!(ring.is_held_by(4, 4));
        assert!(!ring.is_held_by(4, 0));
        assert!(!ring.try_claim(4, 0));
        ring.release(4);
        assert!(ring.try_claim(4, 0));
        assert_eq!(
            SlotSnapshot::from_stamp(4, ring.stamps()[4]),
            SlotSnapshot {
                id: 4,
                holder: Some(0)
            }
        );
    }

    #[test]
    fn test_concurrent_claims_have_single_winner() {
        for _ in 0..50 {
            let slot = Arc::new(Slot::new());
            let winners = Arc::new(AtomicUsize::new(0));
            let threads: Vec<_> = (0..8)
                .map(|claimant| {
                    let slot = Arc::clone(&slot);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        if slot.try_claim(claimant) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert!(slot.holder().is_some());
        }
    }
}
