//! Safety invariants checked against table snapshots.

use thiserror::Error;

use crate::seat::SeatState;
use crate::snapshot::TableSnapshot;

/// A safety property that failed on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant {name} violated at {at_ms}ms: {message}")]
pub struct InvariantViolation {
    /// Short invariant name, stable across runs
    pub name: &'static str,
    pub message: String,
    /// Snapshot time on the table clock
    pub at_ms: u64,
    /// Seats involved
    pub seats: Vec<usize>,
}

impl InvariantViolation {
    pub fn new(name: &'static str, at_ms: u64, seats: Vec<usize>, message: String) -> Self {
        Self {
            name,
            message,
            at_ms,
            seats,
        }
    }
}

/// Check every invariant and return the first violation.
pub fn check(snapshot: &TableSnapshot) -> Result<(), InvariantViolation> {
    match check_all(snapshot).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// Check every invariant and collect all violations.
pub fn check_all(snapshot: &TableSnapshot) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let n = snapshot.len();
    let at = snapshot.taken_at_ms;

    for seat in &snapshot.seats {
        let right_neighbor = (seat.id + 1) % n;
        if seat.state == SeatState::Eating
            && snapshot.seats[right_neighbor].state == SeatState::Eating
        {
            violations.push(InvariantViolation::new(
                "adjacent_eating",
                at,
                vec![seat.id, right_neighbor],
                format!("seats {} and {} are both eating", seat.id, right_neighbor),
            ));
        }

        if seat.state == SeatState::Eating {
            let left = snapshot.left_slot(seat.id);
            let right = snapshot.right_slot(seat.id);
            for slot in [left, right] {
                if snapshot.slots[slot].holder != Some(seat.id) {
                    violations.push(InvariantViolation::new(
                        "eating_without_slots",
                        at,
                        vec![seat.id],
                        format!(
                            "seat {} is eating but slot {} is held by {:?}",
                            seat.id, slot, snapshot.slots[slot].holder
                        ),
                    ));
                }
            }
        }

        let waiting = seat.state == SeatState::Waiting;
        if waiting != seat.waiting_since_ms.is_some() {
            violations.push(InvariantViolation::new(
                "wait_stamp_mismatch",
                at,
                vec![seat.id],
                format!(
                    "seat {} is {} with wait stamp {:?}",
                    seat.id, seat.state, seat.waiting_since_ms
                ),
            ));
        }
    }

    for slot in &snapshot.slots {
        if let Some(holder) = slot.holder {
            // slot i is shared by seat i (right) and seat i+1 (left)
            let adjacent = holder == slot.id || holder == (slot.id + 1) % n;
            if holder >= n || !adjacent {
                violations.push(InvariantViolation::new(
                    "slot_held_by_stranger",
                    at,
                    vec![holder],
                    format!("slot {} is held by non-adjacent seat {}", slot.id, holder),
                ));
            }
        }
    }

    violations
}
