//! Read-only views of the table for observers and the fairness controller.

use serde::{Deserialize, Serialize};

use crate::seat::{SeatId, SeatState};
use crate::slot::{SlotId, SlotSnapshot};

/// Observer view of one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub id: SeatId,
    pub state: SeatState,
    pub meal_count: u64,
    pub must_restrain: bool,
    /// Slots this seat holds, in ring order
    pub held_slots: Vec<SlotId>,
    /// Wait start on the table clock, present iff Waiting
    pub waiting_since_ms: Option<u64>,
}

/// Observer view of the whole table at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Table-clock millisecond at which the snapshot was taken
    pub taken_at_ms: u64,
    pub seats: Vec<SeatSnapshot>,
    pub slots: Vec<SlotSnapshot>,
}

impl TableSnapshot {
    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Left slot of a seat: `(id - 1 + N) mod N`.
    pub fn left_slot(&self, seat: SeatId) -> SlotId {
        (seat + self.len() - 1) % self.len()
    }

    /// Right slot of a seat: its own index.
    pub fn right_slot(&self, seat: SeatId) -> SlotId {
        seat
    }

    /// Lowest meal count across all seats.
    pub fn population_minimum(&self) -> u64 {
        self.seats.iter().map(|s| s.meal_count).min().unwrap_or(0)
    }

    /// Highest meal count across all seats.
    pub fn population_maximum(&self) -> u64 {
        self.seats.iter().map(|s| s.meal_count).max().unwrap_or(0)
    }

    /// `max(meal_count) - min(meal_count)`.
    pub fn fairness_gap(&self) -> u64 {
        self.population_maximum() - self.population_minimum()
    }

    pub fn total_meals(&self) -> u64 {
        self.seats.iter().map(|s| s.meal_count).sum()
    }

    pub fn count_in(&self, state: SeatState) -> usize {
        self.seats.iter().filter(|s| s.state == state).count()
    }

    pub fn waiting_count(&self) -> usize {
        self.count_in(SeatState::Waiting)
    }

    /// Seats currently eating.
    pub fn eating(&self) -> Vec<SeatId> {
        self.seats
            .iter()
            .filter(|s| s.state == SeatState::Eating)
            .map(|s| s.id)
            .collect()
    }

    /// The classic deadlock configuration: every seat is Waiting and holds
    /// exactly its right slot.
    pub fn circular_wait(&self) -> bool {
        !self.is_empty()
            && self.seats.iter().all(|s| {
                s.state == SeatState::Waiting && s.held_slots == [self.right_slot(s.id)]
            })
    }
}
