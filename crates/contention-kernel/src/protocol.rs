//! Acquisition protocol: how a Waiting seat becomes an Eating seat.
//!
//! Two strategies share the [`Acquisition`] trait:
//!
//! - [`OrderedAcquisition`] admits a seat only after a priority check done
//!   under the table's arbitration lock, then claims both slots at once.
//! - [`HoldAndWaitAcquisition`] claims the right slot, keeps it, and polls
//!   the left one. Five seats doing this at once deadlock, which is the
//!   point: it exists so the watchdog has something to catch.
//!
//! Both are polled once per seat tick; neither ever blocks.

use std::sync::Arc;

use tracing::debug;

use crate::config::AcquisitionStrategy;
use crate::events::SimEvent;
use crate::invariants::InvariantViolation;
use crate::seat::{SeatId, SeatState};
use crate::slot::SlotId;
use crate::table::Table;

/// Outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Waiting → Eating; the seat holds both slots.
    Admitted { waited_ms: u64 },
    /// Still Waiting; poll again after a backoff.
    Pending,
    /// Starvation timeout: Waiting → Thinking.
    Aborted {
        waited_ms: u64,
        released_slot: Option<SlotId>,
    },
    /// The seat was not Waiting; nothing to do.
    Idle,
}

/// A rule for turning Waiting into Eating.
pub trait Acquisition: Send + Sync {
    /// Strategy name, as used in configs and results.
    fn name(&self) -> &'static str;

    /// Make one attempt for `seat` at `now_ms`.
    fn poll(&self, table: &Table, seat: SeatId, now_ms: u64) -> Attempt;
}

/// Build the acquisition rule for a configured strategy.
pub fn for_strategy(strategy: AcquisitionStrategy) -> Arc<dyn Acquisition> {
    match strategy {
        AcquisitionStrategy::Ordered => Arc::new(OrderedAcquisition),
        AcquisitionStrategy::HoldAndWait { abort_on_timeout } => {
            Arc::new(HoldAndWaitAcquisition { abort_on_timeout })
        }
    }
}

/// The three admission conditions of the ordered strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionCheck {
    /// Least-fed seat, or waited past half the starvation timeout
    pub has_priority: bool,
    /// Neither neighbour is eating
    pub neighbors_idle: bool,
    /// Nobody eats anywhere, or the seat is not restrained
    pub restraint_ok: bool,
}

impl AdmissionCheck {
    /// Evaluate the conditions for `seat` against the live table.
    ///
    /// Only meaningful under the arbitration lock.
    pub fn evaluate(table: &Table, seat: SeatId, waited_ms: u64) -> Self {
        let me = table.seat(seat);
        let has_priority = me.meal_count() == table.population_minimum()
            || waited_ms >= table.config().priority_threshold_ms();
        let neighbors_idle = [table.left_neighbor(seat), table.right_neighbor(seat)]
            .iter()
            .all(|n| table.seat(*n).state() != SeatState::Eating);
        let restraint_ok = !table.anyone_eating() || !me.must_restrain();
        Self {
            has_priority,
            neighbors_idle,
            restraint_ok,
        }
    }

    pub fn admits(&self) -> bool {
        self.has_priority && self.neighbors_idle && self.restraint_ok
    }
}

/// Priority-checked admission under the arbitration lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedAcquisition;

impl Acquisition for OrderedAcquisition {
    fn name(&self) -> &'static str {
        "ordered"
    }

    fn poll(&self, table: &Table, seat: SeatId, now_ms: u64) -> Attempt {
        let Some(waited_ms) = table.seat(seat).waited_ms(now_ms) else {
            return Attempt::Idle;
        };
        if waited_ms >= table.config().starvation_timeout_ms {
            table.abort_wait(seat, now_ms, waited_ms, None);
            return Attempt::Aborted {
                waited_ms,
                released_slot: None,
            };
        }

        let _guard = table.arbitrate();
        if !AdmissionCheck::evaluate(table, seat, waited_ms).admits() {
            return Attempt::Pending;
        }

        let (left, right) = (table.left_slot(seat), table.right_slot(seat));
        if !table.slots().try_claim(left, seat) {
            report_blocked_claim(table, seat, left, now_ms);
            return Attempt::Pending;
        }
        if !table.slots().try_claim(right, seat) {
            table.slots().release(left);
            report_blocked_claim(table, seat, right, now_ms);
            return Attempt::Pending;
        }
        table.admit(seat, now_ms, waited_ms);
        Attempt::Admitted { waited_ms }
    }
}

/// Only eating seats hold slots under the ordered strategy, and neither
/// neighbour is eating, so a failed claim here means the table is corrupt.
fn report_blocked_claim(table: &Table, seat: SeatId, slot: SlotId, now_ms: u64) {
    let holder = table.slots().holder(slot);
    table.report_violation(InvariantViolation::new(
        "blocked_admission",
        now_ms,
        vec![seat],
        format!(
            "seat {} admitted but slot {} held by {:?}, admission rolled back",
            seat, slot, holder
        ),
    ));
}

/// Right slot first, then poll the left one without letting go.
#[derive(Debug, Clone, Copy)]
pub struct HoldAndWaitAcquisition {
    /// Give up the right slot after the starvation timeout
    pub abort_on_timeout: bool,
}

impl Acquisition for HoldAndWaitAcquisition {
    fn name(&self) -> &'static str {
        AcquisitionStrategy::HoldAndWait {
            abort_on_timeout: self.abort_on_timeout,
        }
        .name()
    }

    fn poll(&self, table: &Table, seat: SeatId, now_ms: u64) -> Attempt {
        let Some(waited_ms) = table.seat(seat).waited_ms(now_ms) else {
            return Attempt::Idle;
        };
        let (left, right) = (table.left_slot(seat), table.right_slot(seat));
        let holds_right = table.slots().is_held_by(right, seat);

        if self.abort_on_timeout && waited_ms >= table.config().starvation_timeout_ms {
            let released_slot = holds_right.then(|| {
                table.slots().release(right);
                right
            });
            table.abort_wait(seat, now_ms, waited_ms, released_slot);
            return Attempt::Aborted {
                waited_ms,
                released_slot,
            };
        }

        if !holds_right {
            if table.slots().try_claim(right, seat) {
                debug!(seat = seat, slot = right, "Holding right slot");
                table.events().emit(SimEvent::SlotClaimed {
                    seat,
                    slot: right,
                    at_ms: now_ms,
                });
            }
            // the left slot is tried on a later tick
            return Attempt::Pending;
        }

        if table.slots().try_claim(left, seat) {
            table.admit(seat, now_ms, waited_ms);
            Attempt::Admitted { waited_ms }
        } else {
            Attempt::Pending
        }
    }
}
