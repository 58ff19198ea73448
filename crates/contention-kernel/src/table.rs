//! The table: single owned simulation context.
//!
//! Seats and slots are created once, live in two fixed-size vectors, and are
//! addressed by index for the whole run. All transitions go through the
//! table so that every state change is logged and counted in one place.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::KernelConfig;
use crate::events::{EventLog, SimEvent};
use crate::invariants::InvariantViolation;
use crate::seat::{Seat, SeatId, SeatState};
use crate::slot::{SlotId, SlotRing, SlotSnapshot};
use crate::snapshot::{SeatSnapshot, TableSnapshot};

/// Slot-pass retries before a snapshot settles for its last reading.
const SNAPSHOT_RETRIES: usize = 64;

/// Shared simulation context: seats, slots, arbitration lock, events, and
/// the process-wide shutdown flag.
#[derive(Debug)]
pub struct Table {
    config: KernelConfig,
    seats: Vec<Seat>,
    slots: SlotRing,
    /// Serializes admission decisions and promotion passes. Guards no data.
    arbitration: Mutex<()>,
    events: EventLog,
    /// One wake-up per seat, signalled when the seat is promoted
    promotions: Vec<Notify>,
    /// First safety violation seen during the run
    violation: Mutex<Option<InvariantViolation>>,
    shutdown: watch::Sender<bool>,
    epoch: Instant,
}

impl Table {
    /// Create a table with every seat Thinking and every slot free.
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let seats = (0..config.seats).map(Seat::new).collect();
        let slots = SlotRing::new(config.slots);
        let promotions = (0..config.seats).map(|_| Notify::new()).collect();
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            seats,
            slots,
            arbitration: Mutex::new(()),
            events: EventLog::default(),
            promotions,
            violation: Mutex::new(None),
            shutdown,
            epoch: Instant::now(),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Number of seats, equal to the number of slots.
    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn seat(&self, id: SeatId) -> &Seat {
        &self.seats[id]
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn slots(&self) -> &SlotRing {
        &self.slots
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Left slot of a seat: `(id - 1 + N) mod N`.
    pub fn left_slot(&self, seat: SeatId) -> SlotId {
        (seat + self.seat_count() - 1) % self.seat_count()
    }

    /// Right slot of a seat: its own index.
    pub fn right_slot(&self, seat: SeatId) -> SlotId {
        seat
    }

    /// Neighbour sharing this seat's left slot.
    pub fn left_neighbor(&self, seat: SeatId) -> SeatId {
        (seat + self.seat_count() - 1) % self.seat_count()
    }

    /// Neighbour sharing this seat's right slot.
    pub fn right_neighbor(&self, seat: SeatId) -> SeatId {
        (seat + 1) % self.seat_count()
    }

    /// Milliseconds since the table was created.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Lowest meal count across all seats.
    pub fn population_minimum(&self) -> u64 {
        self.seats.iter().map(Seat::meal_count).min().unwrap_or(0)
    }

    pub fn waiting_count(&self) -> usize {
        self.seats
            .iter()
            .filter(|s| s.state() == SeatState::Waiting)
            .count()
    }

    pub fn anyone_eating(&self) -> bool {
        self.seats.iter().any(|s| s.state() == SeatState::Eating)
    }

    /// Enter the arbitration critical section.
    pub(crate) fn arbitrate(&self) -> MutexGuard<'_, ()> {
        self.arbitration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the process-wide shutdown flag and wake every paused unit.
    pub fn request_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(at_ms = self.now_ms(), "Shutdown requested");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that observes the shutdown flag.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Record a safety violation. Under strict invariants the run stops.
    pub fn report_violation(&self, violation: InvariantViolation) {
        error!(
            invariant = violation.name,
            seats = ?violation.seats,
            at_ms = violation.at_ms,
            "{}",
            violation.message
        );
        self.events.emit(SimEvent::InvariantViolated {
            at_ms: violation.at_ms,
            name: violation.name.to_string(),
            message: violation.message.clone(),
        });
        self.violation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(violation);
        if self.config.strict_invariants {
            self.request_shutdown();
        }
    }

    /// First safety violation reported so far.
    pub fn violation(&self) -> Option<InvariantViolation> {
        self.violation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Force a seat into Waiting at startup, stamped at the table epoch.
    pub fn seed(&self, seat: SeatId) -> bool {
        let _guard = self.arbitrate();
        let seeded = self.seat(seat).begin_waiting(0);
        if seeded {
            info!(seat = seat, "Seed seat starts waiting");
            self.events.emit(SimEvent::Promoted { seat, at_ms: 0 });
        }
        seeded
    }

    /// Thinking → Waiting on behalf of the fairness controller.
    ///
    /// The seat's unit is woken so its first acquisition attempt does not
    /// wait out the rest of a think pause.
    pub(crate) fn promote(&self, seat: SeatId, now_ms: u64) -> bool {
        let promoted = self.seat(seat).begin_waiting(now_ms);
        if promoted {
            debug!(seat = seat, at_ms = now_ms, "Seat promoted to waiting");
            self.events.emit(SimEvent::Promoted { seat, at_ms: now_ms });
            self.promotions[seat].notify_one();
        }
        promoted
    }

    /// Resolves once `seat` has been promoted since its last wake-up.
    ///
    /// A promotion that lands while nobody is listening is kept and
    /// resolves the next call immediately.
    pub async fn promoted(&self, seat: SeatId) {
        self.promotions[seat].notified().await;
    }

    /// Waiting → Eating. The caller has already claimed both slots.
    pub(crate) fn admit(&self, seat: SeatId, now_ms: u64, waited_ms: u64) {
        self.seat(seat).begin_eating();
        debug!(seat = seat, waited_ms = waited_ms, "Seat admitted to eat");
        self.events.emit(SimEvent::Admitted {
            seat,
            at_ms: now_ms,
            waited_ms,
        });
    }

    /// Waiting → Thinking after the starvation timeout.
    pub(crate) fn abort_wait(
        &self,
        seat: SeatId,
        now_ms: u64,
        waited_ms: u64,
        released_slot: Option<SlotId>,
    ) {
        self.seat(seat).abandon_waiting();
        warn!(
            seat = seat,
            waited_ms = waited_ms,
            released_slot = ?released_slot,
            "Seat waited too long, going back to thinking"
        );
        self.events.emit(SimEvent::StarvationAbort {
            seat,
            at_ms: now_ms,
            waited_ms,
            released_slot,
        });
    }

    /// Eating → Thinking: count the meal, then release both slots.
    ///
    /// The state leaves Eating before the slots are freed, so no reader ever
    /// sees an Eating seat next to a free slot. Both steps happen under the
    /// arbitration lock: an ordered admission must never see a neighbour
    /// that stopped eating but still holds the shared slot.
    pub fn finish_meal(&self, seat: SeatId, now_ms: u64) -> u64 {
        let meals = {
            let _guard = self.arbitrate();
            let meals = self.seat(seat).finish_eating();
            for slot in [self.left_slot(seat), self.right_slot(seat)] {
                if self.slots.is_held_by(slot, seat) {
                    self.slots.release(slot);
                }
            }
            meals
        };
        trace!(seat = seat, meal_count = meals, "Seat finished eating");
        self.events.emit(SimEvent::MealFinished {
            seat,
            at_ms: now_ms,
            meal_count: meals,
        });
        self.refresh_restraint(seat, now_ms);
        meals
    }

    /// Re-evaluate a seat's restraint flag against the population minimum.
    pub fn refresh_restraint(&self, seat: SeatId, now_ms: u64) -> bool {
        let slack = self.config.fairness.slack;
        if let Some(restrained) = self
            .seat(seat)
            .refresh_restraint(self.population_minimum(), slack)
        {
            debug!(seat = seat, restrained = restrained, "Restraint changed");
            self.events.emit(SimEvent::Restrained {
                seat,
                at_ms: now_ms,
                restrained,
            });
        }
        self.seat(seat).must_restrain()
    }

    /// Consistent read-only view of every seat and slot, taken now.
    pub fn snapshot(&self) -> TableSnapshot {
        self.snapshot_at(self.now_ms())
    }

    /// Consistent read-only view stamped with `now_ms`.
    ///
    /// Seats are read between two passes over the slots; the snapshot is
    /// accepted once both passes see identical slot words (holder and
    /// generation), so every seat reading lines up with the slot reading.
    pub fn snapshot_at(&self, now_ms: u64) -> TableSnapshot {
        let mut stamps = self.slots.stamps();
        let mut statuses = self.read_seats();
        for _ in 0..SNAPSHOT_RETRIES {
            let again = self.slots.stamps();
            if again == stamps {
                break;
            }
            stamps = again;
            statuses = self.read_seats();
        }

        let slots: Vec<SlotSnapshot> = stamps
            .iter()
            .enumerate()
            .map(|(id, stamp)| SlotSnapshot::from_stamp(id, *stamp))
            .collect();
        let seats = statuses
            .into_iter()
            .map(|(id, status, meal_count, must_restrain)| SeatSnapshot {
                id,
                state: status.state,
                meal_count,
                must_restrain,
                held_slots: held_by(&slots, id),
                waiting_since_ms: status.wait_started_at,
            })
            .collect();

        TableSnapshot {
            taken_at_ms: now_ms,
            seats,
            slots,
        }
    }

    fn read_seats(&self) -> Vec<(SeatId, crate::seat::SeatStatus, u64, bool)> {
        self.seats
            .iter()
            .map(|s| (s.id(), s.status(), s.meal_count(), s.must_restrain()))
            .collect()
    }
}

fn held_by(slots: &[SlotSnapshot], seat: SeatId) -> Vec<SlotId> {
    slots
        .iter()
        .filter(|slot| slot.holder == Some(seat))
        .map(|slot| slot.id)
        .collect()
}
