//! Observable events emitted by the table.
//!
//! Events fan out on a `tokio::sync::broadcast` channel so observers
//! (renderers, recorders, tests) can follow a run without touching seat
//! state. Every event is also folded into [`EventCounters`], which stay
//! accurate even when nobody subscribes or a subscriber lags.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::seat::SeatId;
use crate::slot::SlotId;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something observable that happened at the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// Fairness controller moved a seat from Thinking to Waiting
    Promoted { seat: SeatId, at_ms: u64 },

    /// Acquisition succeeded: Waiting → Eating
    Admitted {
        seat: SeatId,
        at_ms: u64,
        waited_ms: u64,
    },

    /// Eating finished; the meal was counted and both slots released
    MealFinished {
        seat: SeatId,
        at_ms: u64,
        meal_count: u64,
    },

    /// Waiting exceeded the starvation timeout: back to Thinking
    StarvationAbort {
        seat: SeatId,
        at_ms: u64,
        waited_ms: u64,
        /// Slot released on the way out (hold-and-wait only)
        released_slot: Option<SlotId>,
    },

    /// A seat's restraint flag changed
    Restrained {
        seat: SeatId,
        at_ms: u64,
        restrained: bool,
    },

    /// A hold-and-wait seat claimed its first (right) slot
    SlotClaimed {
        seat: SeatId,
        slot: SlotId,
        at_ms: u64,
    },

    /// No admission for the configured number of starvation timeouts
    LivenessStall {
        at_ms: u64,
        quiet_ms: u64,
        waiting: usize,
        circular_wait: bool,
    },

    /// A safety invariant failed
    InvariantViolated {
        at_ms: u64,
        name: String,
        message: String,
    },
}

impl SimEvent {
    /// Timestamp of the event on the table clock.
    pub fn at_ms(&self) -> u64 {
        match self {
            Self::Promoted { at_ms, .. }
            | Self::Admitted { at_ms, .. }
            | Self::MealFinished { at_ms, .. }
            | Self::StarvationAbort { at_ms, .. }
            | Self::Restrained { at_ms, .. }
            | Self::SlotClaimed { at_ms, .. }
            | Self::LivenessStall { at_ms, .. }
            | Self::InvariantViolated { at_ms, .. } => *at_ms,
        }
    }
}

/// Running totals of every event kind.
#[derive(Debug, Default)]
pub struct EventCounters {
    promotions: AtomicU64,
    admissions: AtomicU64,
    meals: AtomicU64,
    starvation_aborts: AtomicU64,
    liveness_stalls: AtomicU64,
    invariant_violations: AtomicU64,
}

/// Plain copy of [`EventCounters`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTotals {
    pub promotions: u64,
    pub admissions: u64,
    pub meals: u64,
    pub starvation_aborts: u64,
    pub liveness_stalls: u64,
    pub invariant_violations: u64,
}

impl EventCounters {
    fn record(&self, event: &SimEvent) {
        let counter = match event {
            SimEvent::Promoted { .. } => &self.promotions,
            SimEvent::Admitted { .. } => &self.admissions,
            SimEvent::MealFinished { .. } => &self.meals,
            SimEvent::StarvationAbort { .. } => &self.starvation_aborts,
            SimEvent::LivenessStall { .. } => &self.liveness_stalls,
            SimEvent::InvariantViolated { .. } => &self.invariant_violations,
            SimEvent::Restrained { .. } | SimEvent::SlotClaimed { .. } => return,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of Waiting→Eating transitions so far.
    pub fn admissions(&self) -> u64 {
        self.admissions.load(Ordering::Acquire)
    }

    pub fn totals(&self) -> EventTotals {
        EventTotals {
            promotions: self.promotions.load(Ordering::Acquire),
            admissions: self.admissions.load(Ordering::Acquire),
            meals: self.meals.load(Ordering::Acquire),
            starvation_aborts: self.starvation_aborts.load(Ordering::Acquire),
            liveness_stalls: self.liveness_stalls.load(Ordering::Acquire),
            invariant_violations: self.invariant_violations.load(Ordering::Acquire),
        }
    }
}

/// Event fan-out plus counters.
#[derive(Debug)]
pub struct EventLog {
    tx: broadcast::Sender<SimEvent>,
    counters: EventCounters,
}

impl Default for EventLog {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            counters: EventCounters::default(),
        }
    }
}

impl EventLog {
    /// Record and publish an event. Never blocks.
    pub fn emit(&self, event: SimEvent) {
        self.counters.record(&event);
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.tx.subscribe()
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_still_counts() {
        let log = EventLog::default();
        log.emit(SimEvent::Admitted {
            seat: 1,
            at_ms: 10,
            waited_ms: 3,
        });
        log.emit(SimEvent::Restrained {
            seat: 1,
            at_ms: 11,
            restrained: true,
        });
        let totals = log.counters().totals();
        assert_eq!(totals.admissions, 1);
        assert_eq!(totals, EventTotals { admissions: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let log = EventLog::default();
        let mut rx = log.subscribe();
        log.emit(SimEvent::Promoted { seat: 0, at_ms: 1 });
        log.emit(SimEvent::StarvationAbort {
            seat: 0,
            at_ms: 7,
            waited_ms: 6,
            released_slot: Some(0),
        });

        assert_eq!(rx.recv().await.unwrap(), SimEvent::Promoted { seat: 0, at_ms: 1 });
        let abort = rx.recv().await.unwrap();
        assert_eq!(abort.at_ms(), 7);
        assert_eq!(log.counters().totals().starvation_aborts, 1);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SimEvent::LivenessStall {
            at_ms: 100,
            quiet_ms: 90,
            waiting: 5,
            circular_wait: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "liveness_stall");
        assert_eq!(json["circular_wait"], true);
    }
}
