//! Integration tests for the status observer and the experiment runner.
//!
//! The observer tests drive the actor directly inside an acton runtime and
//! read frames back from an in-memory sink. The runner tests use
//! millisecond-scale timings so a full run takes well under a second.

use acton_reactive::prelude::*;
use tokio::time::Duration;

use contention_kernel::{AcquisitionStrategy, DelayRange, KernelConfig, SeedSeat, Simulation};
use dining_experiment::experiment::{ExperimentRunner, ExperimentRunnerConfig};
use dining_experiment::observer::{FinalStatus, FrameSink, StatusFrame, StatusObserver};

fn fast_kernel(strategy: AcquisitionStrategy) -> KernelConfig {
    let mut config = KernelConfig::with_seats(5);
    config.strategy = strategy;
    config.tick_interval_ms = 2;
    config.fairness_interval_ms = 2;
    config.starvation_timeout_ms = 100;
    config.delays.think = DelayRange::new(1, 5);
    config.delays.eat = DelayRange::new(2, 6);
    config.watchdog.check_interval_ms = 5;
    config.rng_seed = Some(11);
    config.strict_invariants = true;
    config
}

#[tokio::test]
async fn test_observer_renders_frames_and_final_status() {
    let mut runtime = ActonApp::launch_async().await;
    let (sink, frames) = FrameSink::buffer();
    let observer = StatusObserver::new(sink).spawn(&mut runtime).await;

    let mut config = KernelConfig::with_seats(5);
    config.seed_seat = SeedSeat::Fixed(2);
    let sim = Simulation::new(config).unwrap();
    let snapshot = sim.table().snapshot_at(0);

    observer
        .send(StatusFrame {
            snapshot: snapshot.clone(),
        })
        .await;
    observer.send(StatusFrame { snapshot }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("║ P0       P1       P2       P3       P4      ║"));
        assert!(frames[0].contains("║ t        t        w        t        t       ║"));
        assert!(frames[0].contains("Lowest meal count: 0"));
    }

    let report = contention_kernel::FinalReport::from_table(sim.table(), Duration::ZERO);
    observer.send(FinalStatus { report }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames[2].starts_with("Final Status:"));
        assert!(frames[2].contains("Seat 2 - State: waiting, Times eaten: 0, Must think: 0"));
    }

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runner_collects_samples_and_renders() {
    let (sink, frames) = FrameSink::buffer();
    let config = ExperimentRunnerConfig {
        kernel: fast_kernel(AcquisitionStrategy::Ordered),
        duration: Some(Duration::from_millis(400)),
        sample_interval_ms: 10,
        render_interval_ms: Some(50),
        sink,
        ..Default::default()
    };

    let result = ExperimentRunner::new(config).run(3).await.unwrap();

    assert_eq!(result.config.trial, 3);
    assert_eq!(result.config.strategy, "ordered");
    assert_eq!(result.config.seed, Some(11));
    assert!(result.samples.len() > 5);
    assert!(result.max_waiting <= 2);
    assert!(result.total_meals() > 0);
    assert!(result.violations.is_empty());
    assert!(result.ended_at >= result.started_at);

    let frames = frames.lock().unwrap();
    assert!(frames.len() >= 2, "only {} frames", frames.len());
    assert!(frames.last().unwrap().starts_with("Final Status:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runner_stops_on_deadlock_stall() {
    let mut kernel = fast_kernel(AcquisitionStrategy::HoldAndWait {
        abort_on_timeout: false,
    });
    kernel.fairness.promotion_cap = 5;
    kernel.delays.think = DelayRange::fixed(0);
    kernel.tick_interval_ms = 10;
    kernel.fairness_interval_ms = 10;
    kernel.watchdog.check_interval_ms = 20;

    let config = ExperimentRunnerConfig {
        kernel,
        duration: Some(Duration::from_secs(30)),
        sample_interval_ms: 20,
        stop_on_stall: true,
        ..Default::default()
    };

    let result = ExperimentRunner::new(config).run(0).await.unwrap();

    let stall = result.first_stall.expect("no stall recorded");
    assert!(stall.circular_wait);
    assert_eq!(stall.waiting, 5);
    assert!(result.deadlocked());
    assert!(result.report.elapsed_ms < 30_000);
    assert_eq!(result.report.totals.starvation_aborts, 0);
}
