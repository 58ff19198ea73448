//! Whole-simulation property tests with millisecond-scale timings.
//!
//! Each test runs the real driver on a multi-thread runtime, samples
//! snapshots (or follows the event stream) while it runs, and checks a
//! safety or fairness property on every sample.

use std::collections::HashSet;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Instant};

use contention_kernel::invariants;
use contention_kernel::{
    AcquisitionStrategy, DelayRange, KernelConfig, SeatState, SeedSeat, SimEvent, Simulation,
    SimulationHandle, TableSnapshot,
};

fn fast_config(strategy: AcquisitionStrategy) -> KernelConfig {
    let mut config = KernelConfig::with_seats(5);
    config.strategy = strategy;
    config.tick_interval_ms = 2;
    config.fairness_interval_ms = 2;
    config.starvation_timeout_ms = 120;
    config.delays.think = DelayRange::new(1, 5);
    config.delays.eat = DelayRange::new(2, 8);
    config.watchdog.check_interval_ms = 5;
    config.rng_seed = Some(2024);
    config.strict_invariants = true;
    config
}

/// Sample snapshots every millisecond for `run_for`.
async fn sample(handle: &SimulationHandle, run_for: Duration) -> Vec<TableSnapshot> {
    let deadline = Instant::now() + run_for;
    let mut samples = Vec::new();
    while Instant::now() < deadline {
        samples.push(handle.snapshot());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    samples
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_ordered() {
    let handle = Simulation::new(fast_config(AcquisitionStrategy::Ordered))
        .unwrap()
        .spawn();
    let samples = sample(&handle, Duration::from_millis(800)).await;

    for snapshot in &samples {
        assert_eq!(invariants::check(snapshot), Ok(()));
        let eating = snapshot.eating();
        // at most two non-adjacent eaters fit on a ring of five
        assert!(eating.len() <= 2);
        for seat in &eating {
            let right_neighbor = (seat + 1) % snapshot.len();
            assert!(!eating.contains(&right_neighbor));
        }
    }
    assert!(!samples.is_empty());

    let report = handle.shutdown().await.unwrap();
    assert!(report.total_meals() > 10, "too little progress: {:?}", report);
    assert_eq!(report.totals.invariant_violations, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_hold_and_wait_slots() {
    let handle = Simulation::new(fast_config(AcquisitionStrategy::HoldAndWait {
        abort_on_timeout: true,
    }))
    .unwrap()
    .spawn();
    let samples = sample(&handle, Duration::from_millis(600)).await;

    for snapshot in &samples {
        assert_eq!(invariants::check(snapshot), Ok(()));
        // no slot reported under two seats
        let mut claimed = HashSet::new();
        for seat in &snapshot.seats {
            for slot in &seat.held_slots {
                assert!(claimed.insert(*slot), "slot {} held twice", slot);
            }
        }
    }
    let report = handle.shutdown().await.unwrap();
    assert_eq!(report.totals.invariant_violations, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_promotion_cap_never_exceeded() {
    for cap in [1, 2, 3] {
        let mut config = fast_config(AcquisitionStrategy::Ordered);
        config.fairness.promotion_cap = cap;
        config.seed_seat = SeedSeat::Fixed(0);
        let handle = Simulation::new(config).unwrap().spawn();
        let samples = sample(&handle, Duration::from_millis(300)).await;
        for snapshot in &samples {
            assert!(
                snapshot.waiting_count() <= cap,
                "{} waiting with cap {}",
                snapshot.waiting_count(),
                cap
            );
        }
        handle.shutdown().await.unwrap();
    }
}

/// Timer and scheduler jitter on top of one tick.
const SCHEDULING_ALLOWANCE_MS: u64 = 25;

/// Longest a seat may stay Waiting: the timeout is checked once per tick.
fn wait_bound(config: &KernelConfig) -> u64 {
    config.starvation_timeout_ms + config.tick_interval_ms + SCHEDULING_ALLOWANCE_MS
}

/// Follow the event stream for `run_for`, checking every admission and
/// abort against the wait bound. Returns (admissions, aborts).
async fn follow_waits(config: KernelConfig, run_for: Duration) -> (usize, usize) {
    let timeout = config.starvation_timeout_ms;
    let bound = wait_bound(&config);

    let handle = Simulation::new(config).unwrap().spawn();
    let mut events = handle.subscribe();
    let deadline = Instant::now() + run_for;
    let (mut admissions, mut aborts) = (0, 0);
    while let Ok(received) = tokio::time::timeout_at(deadline, events.recv()).await {
        match received {
            Ok(SimEvent::Admitted { waited_ms, .. }) => {
                admissions += 1;
                assert!(waited_ms < timeout, "admitted after {}ms", waited_ms);
            }
            Ok(SimEvent::StarvationAbort {
                waited_ms,
                released_slot,
                ..
            }) => {
                aborts += 1;
                assert!(waited_ms >= timeout);
                assert!(waited_ms <= bound, "waited {}ms", waited_ms);
                assert_eq!(released_slot, None);
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    // and no seat still waiting has waited past the bound
    let snapshot = handle.snapshot();
    for seat in &snapshot.seats {
        if let Some(since) = seat.waiting_since_ms {
            assert!(snapshot.taken_at_ms.saturating_sub(since) <= bound);
        }
    }
    handle.shutdown().await.unwrap();
    (admissions, aborts)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_wait_ordered() {
    let config = fast_config(AcquisitionStrategy::Ordered);
    let (admissions, _) = follow_waits(config, Duration::from_millis(800)).await;
    assert!(admissions > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_wait_when_think_outlasts_timeout() {
    let mut config = fast_config(AcquisitionStrategy::Ordered);
    config.starvation_timeout_ms = 100;
    // seats are usually promoted mid-think, and neighbours eat past the timeout
    config.delays.think = DelayRange::fixed(600);
    config.delays.eat = DelayRange::fixed(150);

    let (admissions, aborts) = follow_waits(config, Duration::from_secs(3)).await;
    assert!(admissions > 0);
    assert!(aborts > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fairness_converges() {
    let config = fast_config(AcquisitionStrategy::Ordered);
    let slack = config.fairness.slack;
    let handle = Simulation::new(config).unwrap().spawn();

    let samples = sample(&handle, Duration::from_millis(1_500)).await;
    // skip transient startup
    for snapshot in samples.iter().skip(samples.len() / 4) {
        assert!(
            snapshot.fairness_gap() <= slack + 1,
            "gap {} at {}ms",
            snapshot.fairness_gap(),
            snapshot.taken_at_ms
        );
    }

    let report = handle.shutdown().await.unwrap();
    assert!(report.fairness_gap <= slack + 1);
    let minimum = report.seats.iter().map(|s| s.meal_count).min().unwrap();
    assert!(minimum > 0, "a seat never ate: {:?}", report.seats);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenario_seed_seat_two_restraint_only_beyond_slack() {
    let mut config = fast_config(AcquisitionStrategy::Ordered);
    config.seed_seat = SeedSeat::Fixed(2);
    let slack = config.fairness.slack;

    let sim = Simulation::new(config).unwrap();
    let start = sim.table().snapshot_at(0);
    assert_eq!(start.seats[2].state, SeatState::Waiting);
    assert_eq!(start.seats[2].waiting_since_ms, Some(0));
    assert!(start.seats.iter().all(|s| s.meal_count == 0 && !s.must_restrain));
    assert_eq!(start.count_in(SeatState::Thinking), 4);

    // subscribe before any unit runs so no meal is missed
    let mut events = sim.table().events().subscribe();
    let handle = sim.spawn();
    let mut meals = [0u64; 5];
    let deadline = Instant::now() + Duration::from_millis(800);
    while let Ok(received) = tokio::time::timeout_at(deadline, events.recv()).await {
        match received {
            Ok(SimEvent::MealFinished {
                seat, meal_count, ..
            }) => meals[seat] = meal_count,
            Ok(SimEvent::Restrained {
                seat,
                restrained: true,
                ..
            }) => {
                let minimum = *meals.iter().min().unwrap();
                assert!(
                    meals[seat] > minimum + slack,
                    "seat {} restrained with {} meals, minimum {}",
                    seat,
                    meals[seat],
                    minimum
                );
            }
            Ok(_) => {}
            // counts would be stale after a gap
            Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => break,
        }
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_consistent_under_churn() {
    for strategy in AcquisitionStrategy::all() {
        let mut config = fast_config(strategy);
        config.delays.think = DelayRange::new(0, 2);
        config.delays.eat = DelayRange::new(1, 3);
        config.tick_interval_ms = 1;
        config.fairness_interval_ms = 1;
        config.fairness.promotion_cap = 5;
        config.strict_invariants = false;
        let handle = Simulation::new(config).unwrap().spawn();

        let deadline = Instant::now() + Duration::from_millis(300);
        let mut samples = 0;
        while Instant::now() < deadline {
            let snapshot = handle.snapshot();
            samples += 1;
            for seat in &snapshot.seats {
                if seat.state == SeatState::Eating {
                    let left = snapshot.left_slot(seat.id);
                    let right = snapshot.right_slot(seat.id);
                    assert_eq!(snapshot.slots[left].holder, Some(seat.id));
                    assert_eq!(snapshot.slots[right].holder, Some(seat.id));
                }
                assert_eq!(seat.state == SeatState::Waiting, seat.waiting_since_ms.is_some());
            }
            tokio::task::yield_now().await;
        }
        assert!(samples > 0);

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.totals.invariant_violations, 0, "{}", strategy.name());
    }
}
