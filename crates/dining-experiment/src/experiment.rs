//! Experiment runner for dining experiments.
//!
//! Orchestrates one run:
//! 1. Build the table and seat the seed seat
//! 2. Start the seats, the fairness controller and the monitor
//! 3. Sample snapshots and forward frames to the status observer
//! 4. Stop on deadline, Ctrl-C, stall or strict violation and collect results

use std::sync::Arc;

use acton_reactive::prelude::*;
use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use contention_kernel::{FinalReport, KernelConfig, SimEvent, Simulation, Table};

use crate::observer::{FinalStatus, FrameSink, StatusFrame, StatusObserver};
use crate::results::{ExperimentConfig, ExperimentResult, SampleMetrics, StallRecord};

/// Time given to the observer to render the final status before the runtime stops.
const FINAL_FRAME_GRACE: Duration = Duration::from_millis(50);

/// Configuration for the experiment runner.
#[derive(Debug, Clone)]
pub struct ExperimentRunnerConfig {
    pub kernel: KernelConfig,
    /// Stop after this long; `None` runs until Ctrl-C or an early stop
    pub duration: Option<Duration>,
    /// Snapshot sampling cadence
    pub sample_interval_ms: u64,
    /// Board rendering cadence; `None` starts no observer
    pub render_interval_ms: Option<u64>,
    /// Where the observer writes frames
    pub sink: FrameSink,
    /// End the run at the first liveness stall
    pub stop_on_stall: bool,
    /// End the run on Ctrl-C
    pub handle_interrupt: bool,
}

impl Default for ExperimentRunnerConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            duration: Some(Duration::from_secs(30)),
            sample_interval_ms: 100,
            render_interval_ms: None,
            sink: FrameSink::default(),
            stop_on_stall: false,
            handle_interrupt: false,
        }
    }
}

/// Why the sampling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Deadline,
    Interrupted,
    Stalled,
    Stopping,
}

/// Runs dining experiments.
pub struct ExperimentRunner {
    config: ExperimentRunnerConfig,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentRunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExperimentRunnerConfig {
        &self.config
    }

    /// Run one trial.
    pub async fn run(&self, trial: usize) -> Result<ExperimentResult> {
        let kernel = &self.config.kernel;
        let started_at = Utc::now();
        let started = Instant::now();

        info!(
            strategy = kernel.strategy.name(),
            seats = kernel.seats,
            promotion_cap = kernel.fairness.promotion_cap,
            trial = trial,
            "Starting experiment"
        );

        let sim = Simulation::new(kernel.clone())?;
        let table: Arc<Table> = Arc::clone(sim.table());
        // subscribe before any unit runs
        let mut events = table.events().subscribe();
        let handle = sim.spawn();

        let mut observer = match self.config.render_interval_ms {
            Some(_) => {
                let mut runtime = ActonApp::launch_async().await;
                let actor = StatusObserver::new(self.config.sink.clone())
                    .spawn(&mut runtime)
                    .await;
                Some((runtime, actor))
            }
            None => None,
        };

        let mut sampler =
            tokio::time::interval(Duration::from_millis(self.config.sample_interval_ms.max(1)));
        sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut renderer = tokio::time::interval(Duration::from_millis(
            self.config.render_interval_ms.unwrap_or(1_000).max(1),
        ));
        renderer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut recorder = Recorder::default();
        let reason = loop {
            tokio::select! {
                _ = sampler.tick() => recorder.sample(&table),
                _ = renderer.tick(), if observer.is_some() => {
                    if let Some((_, actor)) = &observer {
                        actor.send(StatusFrame { snapshot: table.snapshot() }).await;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if recorder.record(&event) && self.config.stop_on_stall {
                            break StopReason::Stalled;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "Event recorder lagged");
                    }
                    Err(RecvError::Closed) => break StopReason::Stopping,
                },
                _ = &mut ctrl_c, if self.config.handle_interrupt => break StopReason::Interrupted,
                _ = &mut deadline => break StopReason::Deadline,
                _ = handle.stopping() => break StopReason::Stopping,
            }
        };
        debug!(reason = ?reason, "Sampling stopped");

        let report = match handle.shutdown().await {
            Ok(report) => report,
            Err(violation) => {
                warn!(violation = %violation, "Run stopped on invariant violation");
                FinalReport::from_table(&table, started.elapsed())
            }
        };
        // events emitted between the last poll and shutdown
        loop {
            match events.try_recv() {
                Ok(event) => {
                    recorder.record(&event);
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        recorder.sample(&table);
        if let Some(violation) = table.violation()
            && recorder.violations.is_empty()
        {
            recorder.violations.push(violation.to_string());
        }

        if let Some((mut runtime, actor)) = observer.take() {
            actor
                .send(FinalStatus {
                    report: report.clone(),
                })
                .await;
            tokio::time::sleep(FINAL_FRAME_GRACE).await;
            let _ = runtime.shutdown_all().await;
        }

        let result = ExperimentResult {
            config: ExperimentConfig {
                strategy: kernel.strategy.name().to_string(),
                seats: kernel.seats,
                promotion_cap: kernel.fairness.promotion_cap,
                slack: kernel.fairness.slack,
                starvation_timeout_ms: kernel.starvation_timeout_ms,
                duration_ms: self.config.duration.map(|d| d.as_millis() as u64),
                trial,
                seed: kernel.rng_seed,
            },
            started_at,
            ended_at: Utc::now(),
            report,
            max_waiting: recorder.max_waiting,
            max_fairness_gap: recorder.max_fairness_gap,
            first_stall: recorder.first_stall,
            violations: recorder.violations,
            samples: recorder.samples,
        };

        info!(
            strategy = %result.config.strategy,
            trial = trial,
            meals = result.total_meals(),
            fairness_gap = result.report.fairness_gap,
            stalled = result.first_stall.is_some(),
            "Experiment complete"
        );
        Ok(result)
    }
}

/// Accumulates samples and notable events during a run.
#[derive(Debug, Default)]
struct Recorder {
    samples: Vec<SampleMetrics>,
    max_waiting: usize,
    max_fairness_gap: u64,
    first_stall: Option<StallRecord>,
    violations: Vec<String>,
}

impl Recorder {
    fn sample(&mut self, table: &Table) {
        let snapshot = table.snapshot();
        let metrics = SampleMetrics {
            at_ms: snapshot.taken_at_ms,
            waiting: snapshot.waiting_count(),
            eating: snapshot.eating().len(),
            total_meals: snapshot.total_meals(),
            fairness_gap: snapshot.fairness_gap(),
        };
        self.max_waiting = self.max_waiting.max(metrics.waiting);
        self.max_fairness_gap = self.max_fairness_gap.max(metrics.fairness_gap);
        self.samples.push(metrics);
    }

    /// Returns true when the event is the first liveness stall.
    fn record(&mut self, event: &SimEvent) -> bool {
        match event {
            SimEvent::LivenessStall {
                at_ms,
                quiet_ms,
                waiting,
                circular_wait,
            } if self.first_stall.is_none() => {
                self.first_stall = Some(StallRecord {
                    at_ms: *at_ms,
                    quiet_ms: *quiet_ms,
                    waiting: *waiting,
                    circular_wait: *circular_wait,
                });
                true
            }
            SimEvent::InvariantViolated {
                at_ms,
                name,
                message,
            } => {
                self.violations
                    .push(format!("{} at {}ms: {}", name, at_ms, message));
                false
            }
            _ => false,
        }
    }
}
