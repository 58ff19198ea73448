//! Seat types: one concurrent actor per seat around the ring.
//!
//! A seat's lifecycle state and its wait stamp live in one `AtomicU64`, so
//! `wait_started_at` is defined exactly when the state is Waiting, for every
//! reader at every instant:
//!
//! ```text
//! ┌────────────┬──────────────────────────────────────┐
//! │ state (8)  │ wait start, table-clock ms (56)      │
//! └────────────┴──────────────────────────────────────┘
//! ```
//!
//! The word is written by the seat's own unit, except the Thinking→Waiting
//! promotion which the fairness controller performs with a compare-and-swap.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Index of a seat around the table.
pub type SeatId = usize;

const STATE_SHIFT: u32 = 56;
const STAMP_MASK: u64 = (1 << STATE_SHIFT) - 1;

/// Lifecycle state of a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SeatState {
    /// Idle, not contending
    Thinking = 1,
    /// Trying to acquire both adjacent slots
    Waiting = 2,
    /// Holding both slots
    Eating = 3,
}

impl SeatState {
    fn from_bits(raw: u64) -> Self {
        match raw {
            2 => Self::Waiting,
            3 => Self::Eating,
            _ => Self::Thinking,
        }
    }

    /// Single-letter code used by the board renderer.
    pub fn letter(&self) -> char {
        match self {
            Self::Thinking => 't',
            Self::Waiting => 'w',
            Self::Eating => 'e',
        }
    }
}

impl fmt::Display for SeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Thinking => "thinking",
            Self::Waiting => "waiting",
            Self::Eating => "eating",
        };
        f.write_str(name)
    }
}

/// One consistent reading of a seat's lifecycle word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatStatus {
    pub state: SeatState,
    /// Set iff `state == Waiting`
    pub wait_started_at: Option<u64>,
}

impl SeatStatus {
    fn decode(word: u64) -> Self {
        let state = SeatState::from_bits(word >> STATE_SHIFT);
        let wait_started_at = (state == SeatState::Waiting).then_some(word & STAMP_MASK);
        Self {
            state,
            wait_started_at,
        }
    }

    fn encode(state: SeatState, wait_started_at: u64) -> u64 {
        ((state as u64) << STATE_SHIFT) | (wait_started_at & STAMP_MASK)
    }
}

/// Shared state of one seat.
#[derive(Debug)]
pub struct Seat {
    id: SeatId,
    status: AtomicU64,
    meal_count: AtomicU64,
    must_restrain: AtomicBool,
}

impl Seat {
    /// Create a thinking seat with no meals.
    pub fn new(id: SeatId) -> Self {
        Self {
            id,
            status: AtomicU64::new(SeatStatus::encode(SeatState::Thinking, 0)),
            meal_count: AtomicU64::new(0),
            must_restrain: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SeatId {
        self.id
    }

    /// State and wait stamp, read together.
    pub fn status(&self) -> SeatStatus {
        SeatStatus::decode(self.status.load(Ordering::Acquire))
    }

    pub fn state(&self) -> SeatState {
        self.status().state
    }

    pub fn meal_count(&self) -> u64 {
        self.meal_count.load(Ordering::Acquire)
    }

    pub fn must_restrain(&self) -> bool {
        self.must_restrain.load(Ordering::Acquire)
    }

    /// When the current Waiting period started, if the seat is waiting.
    pub fn wait_started_at(&self) -> Option<u64> {
        self.status().wait_started_at
    }

    /// Milliseconds spent in the current Waiting period.
    pub fn waited_ms(&self, now_ms: u64) -> Option<u64> {
        self.wait_started_at()
            .map(|started| now_ms.saturating_sub(started))
    }

    /// Thinking → Waiting, stamping the wait start. Fails unless the seat is Thinking.
    pub(crate) fn begin_waiting(&self, now_ms: u64) -> bool {
        let current = self.status.load(Ordering::Acquire);
        if SeatStatus::decode(current).state != SeatState::Thinking {
            return false;
        }
        self.status
            .compare_exchange(
                current,
                SeatStatus::encode(SeatState::Waiting, now_ms),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Waiting → Eating.
    pub(crate) fn begin_eating(&self) {
        self.status.store(
            SeatStatus::encode(SeatState::Eating, 0),
            Ordering::Release,
        );
    }

    /// Waiting → Thinking (starvation abort).
    pub(crate) fn abandon_waiting(&self) {
        self.status.store(
            SeatStatus::encode(SeatState::Thinking, 0),
            Ordering::Release,
        );
    }

    /// Eating → Thinking, counting the meal. Returns the new meal count.
    pub(crate) fn finish_eating(&self) -> u64 {
        let meals = self.meal_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.status.store(
            SeatStatus::encode(SeatState::Thinking, 0),
            Ordering::Release,
        );
        meals
    }

    /// Re-evaluate the restraint flag. Returns the new value when it changed.
    pub(crate) fn refresh_restraint(&self, population_minimum: u64, slack: u64) -> Option<bool> {
        let restrain = self.meal_count() > population_minimum.saturating_add(slack);
        let previous = self.must_restrain.swap(restrain, Ordering::AcqRel);
        (previous != restrain).then_some(restrain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_seat_is_thinking() {
        let seat = Seat::new(2);
        assert_eq!(seat.id(), 2);
        assert_eq!(seat.state(), SeatState::Thinking);
        assert_eq!(seat.meal_count(), 0);
        assert!(!seat.must_restrain());
        assert_eq!(seat.wait_started_at(), None);
    }

    #[test]
    fn test_wait_stamp_defined_iff_waiting() {
        let seat = Seat::new(0);
        assert!(seat.begin_waiting(1_000));
        assert_eq!(
            seat.status(),
            SeatStatus {
                state: SeatState::Waiting,
                wait_started_at: Some(1_000)
            }
        );
        assert_eq!(seat.waited_ms(1_750), Some(750));

        seat.begin_eating();
        assert_eq!(seat.state(), SeatState::Eating);
        assert_eq!(seat.wait_started_at(), None);
    }

    #[test]
    fn test_waiting_at_table_epoch_keeps_stamp() {
        let seat = Seat::new(0);
        assert!(seat.begin_waiting(0));
        assert_eq!(seat.wait_started_at(), Some(0));
    }

    #[test]
    fn test_begin_waiting_requires_thinking() {
        let seat = Seat::new(0);
        assert!(seat.begin_waiting(10));
        assert!(!seat.begin_waiting(20), "already waiting");
        assert_eq!(seat.wait_started_at(), Some(10), "stamp must not move");

        seat.begin_eating();
        assert!(!seat.begin_waiting(30), "eating seats are never promoted");
        assert_eq!(seat.wait_started_at(), None);
    }

    #[test]
    fn test_meal_counted_exactly_once_per_eating_period() {
        let seat = Seat::new(1);
        assert!(seat.begin_waiting(0));
        seat.begin_eating();
        assert_eq!(seat.finish_eating(), 1);
        assert_eq!(seat.state(), SeatState::Thinking);
        assert_eq!(seat.meal_count(), 1);
    }

    #[test]
    fn test_abandon_waiting_clears_stamp() {
        let seat = Seat::new(1);
        assert!(seat.begin_waiting(5));
        seat.abandon_waiting();
        assert_eq!(seat.state(), SeatState::Thinking);
        assert_eq!(seat.wait_started_at(), None);
        assert_eq!(seat.meal_count(), 0);
    }

    #[test]
    fn test_restraint_set_and_cleared_around_slack() {
        let seat = Seat::new(0);
        for _ in 0..3 {
            assert!(seat.begin_waiting(0));
            seat.begin_eating();
            seat.finish_eating();
        }
        // 3 meals, minimum 1, slack 1: 3 > 2
        assert_eq!(seat.refresh_restraint(1, 1), Some(true));
        assert!(seat.must_restrain());
        assert_eq!(seat.refresh_restraint(1, 1), None, "unchanged");
        // minimum caught up to 2: 3 <= 3
        assert_eq!(seat.refresh_restraint(2, 1), Some(false));
        assert!(!seat.must_restrain());
        // slack 2 tolerates a gap of two
        assert_eq!(seat.refresh_restraint(1, 2), None);
    }

    #[test]
    fn test_state_letters() {
        assert_eq!(SeatState::Thinking.letter(), 't');
        assert_eq!(SeatState::Waiting.letter(), 'w');
        assert_eq!(SeatState::Eating.letter(), 'e');
        assert_eq!(SeatState::Eating.to_string(), "eating");
    }
}
