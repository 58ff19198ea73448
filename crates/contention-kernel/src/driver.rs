//! Simulation driver: one tokio task per seat, plus the fairness controller
//! and a monitor running the invariant checks and the liveness watchdog.
//!
//! Every loop checks the table's shutdown flag at each tick boundary. Think
//! pauses and backoffs wake early on shutdown; a meal in progress always
//! completes, is counted, and releases its slots before the seat stops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{KernelConfig, SeedSeat};
use crate::events::{EventTotals, SimEvent};
use crate::fairness::FairnessController;
use crate::invariants::{self, InvariantViolation};
use crate::lifecycle::{SeatAction, SeatLifecycle};
use crate::protocol::{self, Acquisition};
use crate::seat::{SeatId, SeatState};
use crate::snapshot::TableSnapshot;
use crate::table::Table;
use crate::watchdog::LivenessWatchdog;

/// A configured table, ready to run.
pub struct Simulation {
    table: Arc<Table>,
    acquisition: Arc<dyn Acquisition>,
    rng: ChaCha8Rng,
    seed_seat: Option<SeatId>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("seats", &self.table.seat_count())
            .field("strategy", &self.acquisition.name())
            .field("seed_seat", &self.seed_seat)
            .finish()
    }
}

impl Simulation {
    /// Build the table and seat the seed seat, if any, in Waiting.
    pub fn new(config: KernelConfig) -> Result<Self> {
        let table = Table::new(config)?;
        let mut rng = match table.config().rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        let seed_seat = match table.config().seed_seat {
            SeedSeat::Random => Some(rng.random_range(0..table.seat_count())),
            SeedSeat::Fixed(seat) => Some(seat),
            SeedSeat::None => None,
        };
        if let Some(seat) = seed_seat {
            table.seed(seat);
        }
        let acquisition = protocol::for_strategy(table.config().strategy);
        Ok(Self {
            table: Arc::new(table),
            acquisition,
            rng,
            seed_seat,
        })
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn seed_seat(&self) -> Option<SeatId> {
        self.seed_seat
    }

    /// Start every unit on the current tokio runtime.
    pub fn spawn(mut self) -> SimulationHandle {
        let table = self.table;
        info!(
            seats = table.seat_count(),
            strategy = self.acquisition.name(),
            seed_seat = ?self.seed_seat,
            promotion_cap = table.config().fairness.promotion_cap,
            "Starting simulation"
        );

        let mut tasks = Vec::with_capacity(table.seat_count() + 2);
        for seat in 0..table.seat_count() {
            let lifecycle = SeatLifecycle::new(
                seat,
                Arc::clone(&self.acquisition),
                ChaCha8Rng::from_rng(&mut self.rng),
            );
            tasks.push(tokio::spawn(run_seat(Arc::clone(&table), lifecycle)));
        }

        let controller = FairnessController::new(
            &table.config().fairness,
            ChaCha8Rng::from_rng(&mut self.rng),
        );
        tasks.push(tokio::spawn(run_fairness(Arc::clone(&table), controller)));

        let watchdog = LivenessWatchdog::new(table.config().stall_threshold_ms(), table.now_ms());
        tasks.push(tokio::spawn(run_monitor(Arc::clone(&table), watchdog)));

        SimulationHandle {
            table,
            tasks,
            started: Instant::now(),
        }
    }
}

/// Handle to a running simulation.
#[derive(Debug)]
pub struct SimulationHandle {
    table: Arc<Table>,
    tasks: Vec<JoinHandle<()>>,
    started: Instant,
}

impl SimulationHandle {
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Consistent read-only view of the table. Never blocks the seats.
    pub fn snapshot(&self) -> TableSnapshot {
        self.table.snapshot()
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.table.events().subscribe()
    }

    /// Whether shutdown has been requested, externally or by a strict violation.
    pub fn is_stopping(&self) -> bool {
        self.table.is_shutdown()
    }

    /// Resolve once shutdown has been requested.
    pub async fn stopping(&self) {
        let mut signal = self.table.shutdown_signal();
        wait_for_stop(&mut signal).await;
    }

    /// Stop every unit, wait for them, and report the final table.
    ///
    /// Under strict invariants the first violation seen is returned as the
    /// error instead of the report.
    pub async fn shutdown(self) -> Result<FinalReport, InvariantViolation> {
        self.table.request_shutdown();
        for joined in join_all(self.tasks).await {
            if let Err(e) = joined {
                error!(error = %e, "Simulation task failed");
            }
        }

        let report = FinalReport::from_table(&self.table, self.started.elapsed());
        info!(
            elapsed_ms = report.elapsed_ms,
            total_meals = report.total_meals(),
            fairness_gap = report.fairness_gap,
            starvation_aborts = report.totals.starvation_aborts,
            liveness_stalls = report.totals.liveness_stalls,
            "Simulation stopped"
        );
        for seat in &report.seats {
            info!(
                seat = seat.id,
                state = %seat.state,
                meal_count = seat.meal_count,
                must_restrain = seat.must_restrain,
                "Final seat status"
            );
        }

        match self.table.violation() {
            Some(violation) if self.table.config().strict_invariants => Err(violation),
            _ => Ok(report),
        }
    }
}

/// Final status of one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatReport {
    pub id: SeatId,
    pub state: SeatState,
    pub meal_count: u64,
    pub must_restrain: bool,
}

/// What a run looked like when it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub strategy: String,
    pub elapsed_ms: u64,
    pub seats: Vec<SeatReport>,
    pub fairness_gap: u64,
    pub totals: EventTotals,
}

impl FinalReport {
    pub fn from_table(table: &Table, elapsed: Duration) -> Self {
        let snapshot = table.snapshot();
        Self {
            strategy: table.config().strategy.name().to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
            fairness_gap: snapshot.fairness_gap(),
            seats: snapshot
                .seats
                .iter()
                .map(|s| SeatReport {
                    id: s.id,
                    state: s.state,
                    meal_count: s.meal_count,
                    must_restrain: s.must_restrain,
                })
                .collect(),
            totals: table.events().counters().totals(),
        }
    }

    pub fn total_meals(&self) -> u64 {
        self.seats.iter().map(|s| s.meal_count).sum()
    }
}

async fn run_seat(table: Arc<Table>, mut lifecycle: SeatLifecycle) {
    let mut signal = table.shutdown_signal();
    let seat = lifecycle.seat();
    let tick = Duration::from_millis(table.config().tick_interval_ms);
    while !table.is_shutdown() {
        match lifecycle.step(&table) {
            SeatAction::Think(pause) => {
                // a promotion ends the think pause: Waiting seats poll every tick
                tokio::select! {
                    _ = pause_unless_stopped(&mut signal, pause) => {}
                    _ = table.promoted(seat) => continue,
                }
            }
            SeatAction::Eat(pause) => {
                tokio::time::sleep(pause).await;
                lifecycle.finish_meal(&table);
            }
            SeatAction::Backoff => {}
        }
        tokio::select! {
            _ = pause_unless_stopped(&mut signal, tick) => {}
            _ = table.promoted(seat) => {}
        }
    }
    debug!(seat = seat, "Seat stopped");
}

async fn run_fairness(table: Arc<Table>, mut controller: FairnessController) {
    let mut signal = table.shutdown_signal();
    let cadence = Duration::from_millis(table.config().fairness_interval_ms);
    while !table.is_shutdown() {
        controller.pass(&table);
        pause_unless_stopped(&mut signal, cadence).await;
    }
    debug!(passes = controller.passes(), "Fairness controller stopped");
}

async fn run_monitor(table: Arc<Table>, mut watchdog: LivenessWatchdog) {
    let mut signal = table.shutdown_signal();
    let cadence = Duration::from_millis(table.config().watchdog.check_interval_ms);
    while !table.is_shutdown() {
        let snapshot = table.snapshot();
        if let Err(violation) = invariants::check(&snapshot) {
            table.report_violation(violation);
        }

        let admissions = table.events().counters().admissions();
        if let Some(stall) =
            watchdog.observe(snapshot.taken_at_ms, admissions, snapshot.waiting_count())
        {
            let circular_wait = snapshot.circular_wait();
            warn!(
                quiet_ms = stall.quiet_ms,
                waiting = stall.waiting,
                circular_wait = circular_wait,
                "No seat admitted to eat, liveness stall"
            );
            table.events().emit(SimEvent::LivenessStall {
                at_ms: stall.at_ms,
                quiet_ms: stall.quiet_ms,
                waiting: stall.waiting,
                circular_wait,
            });
        }
        pause_unless_stopped(&mut signal, cadence).await;
    }
    debug!(episodes = watchdog.episodes(), "Monitor stopped");
}

async fn pause_unless_stopped(signal: &mut watch::Receiver<bool>, pause: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(pause) => {}
        _ = wait_for_stop(signal) => {}
    }
}

async fn wait_for_stop(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            // the table is gone, so is everything waiting on it
            return;
        }
    }
}
