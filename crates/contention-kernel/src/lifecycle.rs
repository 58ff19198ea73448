//! Per-seat lifecycle: one step of the state machine per tick.
//!
//! A step never sleeps. It reads the seat's state, runs the acquisition
//! protocol when the seat is Waiting, and tells the caller which pause to
//! take next. The driver turns those actions into real delays; tests drive
//! steps directly with a synthetic clock.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::DelayRange;
use crate::protocol::{Acquisition, Attempt};
use crate::seat::{SeatId, SeatState};
use crate::table::Table;

/// What a seat does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatAction {
    /// Idle pause; cut short by shutdown
    Think(Duration),
    /// Meal in progress; always completes, then [`SeatLifecycle::finish_meal`]
    Eat(Duration),
    /// Still waiting (or just gave up); poll again next tick
    Backoff,
}

/// Drives one seat through Thinking, Waiting and Eating.
pub struct SeatLifecycle {
    seat: SeatId,
    acquisition: Arc<dyn Acquisition>,
    rng: ChaCha8Rng,
    last_attempt: Option<Attempt>,
}

impl std::fmt::Debug for SeatLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeatLifecycle")
            .field("seat", &self.seat)
            .field("acquisition", &self.acquisition.name())
            .field("last_attempt", &self.last_attempt)
            .finish()
    }
}

impl SeatLifecycle {
    pub fn new(seat: SeatId, acquisition: Arc<dyn Acquisition>, rng: ChaCha8Rng) -> Self {
        Self {
            seat,
            acquisition,
            rng,
            last_attempt: None,
        }
    }

    pub fn seat(&self) -> SeatId {
        self.seat
    }

    /// Outcome of the most recent acquisition attempt.
    pub fn last_attempt(&self) -> Option<Attempt> {
        self.last_attempt
    }

    /// Step at the table's current time.
    pub fn step(&mut self, table: &Table) -> SeatAction {
        let now = table.now_ms();
        self.step_at(table, now)
    }

    /// Step at `now_ms`.
    ///
    /// Thinking seats keep thinking: only the fairness controller moves them
    /// to Waiting, and restraint never interrupts a wait or a meal.
    pub fn step_at(&mut self, table: &Table, now_ms: u64) -> SeatAction {
        table.refresh_restraint(self.seat, now_ms);
        match table.seat(self.seat).state() {
            SeatState::Thinking => SeatAction::Think(self.sample(table.config().delays.think)),
            SeatState::Waiting => {
                let attempt = self.acquisition.poll(table, self.seat, now_ms);
                self.last_attempt = Some(attempt);
                match attempt {
                    Attempt::Admitted { .. } => {
                        SeatAction::Eat(self.sample(table.config().delays.eat))
                    }
                    Attempt::Pending | Attempt::Aborted { .. } | Attempt::Idle => {
                        SeatAction::Backoff
                    }
                }
            }
            // only reachable if a meal was interrupted before finish_meal
            SeatState::Eating => SeatAction::Eat(self.sample(table.config().delays.eat)),
        }
    }

    /// Close the current meal: count it, release both slots, refresh restraint.
    pub fn finish_meal(&self, table: &Table) -> u64 {
        table.finish_meal(self.seat, table.now_ms())
    }

    fn sample(&mut self, range: DelayRange) -> Duration {
        Duration::from_millis(self.rng.random_range(range.min_ms..=range.max_ms))
    }
}
