//! Fairness controller: decides which Thinking seats may start contending.
//!
//! A pass looks at the whole table, and if fewer than `promotion_cap` seats
//! are Waiting, promotes randomly chosen least-fed Thinking seats until the
//! cap is reached. The decision itself is [`plan_promotions`], a pure
//! function over a snapshot; [`FairnessController`] applies it to the live
//! table under the arbitration lock.

use rand::Rng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::config::FairnessConfig;
use crate::seat::{SeatId, SeatState};
use crate::snapshot::SeatSnapshot;
use crate::table::Table;

/// Result of one arbitration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionPlan {
    /// Lowest meal count seen by the pass
    pub population_minimum: u64,
    /// Seats already Waiting when the pass ran
    pub waiting: usize,
    /// Seats to move from Thinking to Waiting
    pub promote: Vec<SeatId>,
}

/// Choose which seats to promote.
///
/// Eligible seats are Thinking with `meal_count == population_minimum`. Up
/// to `cap - waiting` of them are chosen uniformly at random without
/// replacement; nothing is chosen once `waiting >= cap`.
pub fn plan_promotions<R: Rng + ?Sized>(
    seats: &[SeatSnapshot],
    cap: usize,
    rng: &mut R,
) -> PromotionPlan {
    let population_minimum = seats.iter().map(|s| s.meal_count).min().unwrap_or(0);
    let waiting = seats
        .iter()
        .filter(|s| s.state == SeatState::Waiting)
        .count();

    let mut plan = PromotionPlan {
        population_minimum,
        waiting,
        promote: Vec::new(),
    };
    if waiting >= cap {
        return plan;
    }

    let eligible: Vec<SeatId> = seats
        .iter()
        .filter(|s| s.state == SeatState::Thinking && s.meal_count == population_minimum)
        .map(|s| s.id)
        .collect();
    plan.promote = eligible
        .choose_multiple(rng, cap - waiting)
        .copied()
        .collect();
    plan
}

/// Periodic arbiter applying [`plan_promotions`] to the live table.
#[derive(Debug)]
pub struct FairnessController {
    cap: usize,
    rng: ChaCha8Rng,
    passes: u64,
}

impl FairnessController {
    pub fn new(config: &FairnessConfig, rng: ChaCha8Rng) -> Self {
        Self {
            cap: config.promotion_cap,
            rng,
            passes: 0,
        }
    }

    /// Passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run one arbitration pass now.
    pub fn pass(&mut self, table: &Table) -> PromotionPlan {
        let now = table.now_ms();
        self.pass_at(table, now)
    }

    /// Run one arbitration pass stamped at `now_ms`.
    ///
    /// Returns the plan with only the seats that were actually promoted.
    pub fn pass_at(&mut self, table: &Table, now_ms: u64) -> PromotionPlan {
        self.passes += 1;
        let _guard = table.arbitrate();
        let snapshot = table.snapshot_at(now_ms);
        let mut plan = plan_promotions(&snapshot.seats, self.cap, &mut self.rng);
        // A seat may have left Thinking since the snapshot; skip it
        plan.promote.retain(|seat| table.promote(*seat, now_ms));
        if !plan.promote.is_empty() {
            trace!(
                pass = self.passes,
                minimum = plan.population_minimum,
                promoted = ?plan.promote,
                "Fairness pass"
            );
        }
        plan
    }
}
