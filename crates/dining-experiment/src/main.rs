//! Dining Experiment CLI.
//!
//! Commands:
//! - run: One live simulation with a console board
//! - grid: Strategies × seat counts × trials, with a JSON summary
//! - deadlock: Reproduce the hold-and-wait deadlock and report its detection

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use contention_kernel::{AcquisitionStrategy, DelayRange, KernelConfig, SeedSeat};
use dining_experiment::experiment::{ExperimentRunner, ExperimentRunnerConfig};
use dining_experiment::observer::FrameSink;
use dining_experiment::render::render_final;
use dining_experiment::results::{GridResults, format_duration, timestamped_path};

#[derive(Parser)]
#[command(name = "dining-experiment")]
#[command(version)]
#[command(about = "Fair arbitration of a ring of shared slots")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Table settings shared by every command.
#[derive(Args, Debug, Clone)]
struct KernelArgs {
    /// JSON kernel config; flags below override it
    #[arg(long, env = "DINING_CONFIG")]
    config: Option<PathBuf>,

    /// Number of seats (and slots)
    #[arg(long)]
    seats: Option<usize>,

    /// Starvation timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Meals a seat may lead the least-fed seat by before it must think
    #[arg(long)]
    slack: Option<u64>,

    /// Maximum seats Waiting at once
    #[arg(long)]
    cap: Option<usize>,

    /// Think delay range in milliseconds, "min,max"
    #[arg(long, value_delimiter = ',')]
    think_ms: Option<Vec<u64>>,

    /// Eat delay range in milliseconds, "min,max"
    #[arg(long, value_delimiter = ',')]
    eat_ms: Option<Vec<u64>>,

    /// Seat tick and fairness cadence in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Seat that starts Waiting (random if omitted)
    #[arg(long, conflicts_with = "no_seed_seat")]
    seed_seat: Option<usize>,

    /// Start with every seat Thinking
    #[arg(long)]
    no_seed_seat: bool,

    /// Random seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

impl KernelArgs {
    fn into_config(self) -> Result<KernelConfig> {
        let mut config = match &self.config {
            Some(path) => KernelConfig::load(path)?,
            None => KernelConfig::default(),
        };
        if let Some(seats) = self.seats {
            config.seats = seats;
            config.slots = seats;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.starvation_timeout_ms = timeout_ms;
        }
        if let Some(slack) = self.slack {
            config.fairness.slack = slack;
        }
        if let Some(cap) = self.cap {
            config.fairness.promotion_cap = cap;
        }
        if let Some(range) = &self.think_ms {
            config.delays.think = parse_range("think", range)?;
        }
        if let Some(range) = &self.eat_ms {
            config.delays.eat = parse_range("eat", range)?;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick_interval_ms = tick_ms;
            config.fairness_interval_ms = tick_ms;
        }
        if let Some(seat) = self.seed_seat {
            config.seed_seat = SeedSeat::Fixed(seat);
        }
        if self.no_seed_seat {
            config.seed_seat = SeedSeat::None;
        }
        if self.seed.is_some() {
            config.rng_seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }
}

/// "min,max" or a single fixed value.
fn parse_range(name: &str, values: &[u64]) -> Result<DelayRange> {
    match values {
        [fixed] => Ok(DelayRange::fixed(*fixed)),
        [min, max] => Ok(DelayRange::new(*min, *max)),
        _ => bail!("--{}-ms takes one value or min,max", name),
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single live simulation
    Run {
        #[command(flatten)]
        kernel: KernelArgs,

        /// Strategy to use
        #[arg(long, default_value = "ordered")]
        strategy: String,

        /// Stop after this many seconds (runs until Ctrl-C if omitted)
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Board refresh interval
        #[arg(long, default_value = "1000")]
        render_interval_ms: u64,

        /// Do not draw the board
        #[arg(long)]
        quiet: bool,
    },

    /// Run grid experiment
    Grid {
        #[command(flatten)]
        kernel: KernelArgs,

        /// Number of trials per configuration
        #[arg(long, default_value = "5")]
        trials: usize,

        /// Seconds per run
        #[arg(long, default_value = "10")]
        duration_secs: u64,

        /// Seat counts to test (comma-separated)
        #[arg(long, default_value = "5,7,9", value_delimiter = ',')]
        seat_counts: Vec<usize>,

        /// Strategies to test (comma-separated). Default: all
        /// Valid: ordered, hold_and_wait, hold_and_wait_no_timeout
        #[arg(long, value_delimiter = ',')]
        strategies: Option<Vec<String>>,

        /// Output file for results
        #[arg(long, default_value = "results.json")]
        output: PathBuf,
    },

    /// Reproduce the hold-and-wait deadlock
    Deadlock {
        #[command(flatten)]
        kernel: KernelArgs,

        /// Give up after this many seconds if no stall is flagged
        #[arg(long, default_value = "60")]
        max_secs: u64,

        /// Board refresh interval
        #[arg(long, default_value = "500")]
        render_interval_ms: u64,

        /// Do not draw the board
        #[arg(long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            kernel,
            strategy,
            duration_secs,
            render_interval_ms,
            quiet,
        } => {
            let mut kernel = kernel.into_config()?;
            kernel.strategy = strategy.parse()?;

            let config = ExperimentRunnerConfig {
                kernel,
                duration: duration_secs.map(Duration::from_secs),
                render_interval_ms: Some(render_interval_ms),
                sink: if quiet {
                    FrameSink::Discard
                } else {
                    FrameSink::Stdout
                },
                handle_interrupt: true,
                ..Default::default()
            };

            let runner = ExperimentRunner::new(config);
            let result = runner.run(0).await?;

            if quiet {
                print!("{}", render_final(&result.report));
            }
            println!("\n=== Run Result ===");
            println!("Strategy: {}", result.config.strategy);
            println!("Seats: {}", result.config.seats);
            println!("Elapsed: {}", format_duration(result.report.elapsed_ms));
            println!("Meals: {}", result.total_meals());
            println!("Fairness gap: {}", result.report.fairness_gap);
            println!("Max waiting: {}", result.max_waiting);
            println!(
                "Starvation aborts: {}",
                result.report.totals.starvation_aborts
            );
            if let Some(stall) = &result.first_stall {
                println!(
                    "Liveness stall at {} (circular wait: {})",
                    format_duration(stall.at_ms),
                    stall.circular_wait
                );
            }
            for violation in &result.violations {
                println!("Invariant violation: {}", violation);
            }
        }

        Commands::Grid {
            kernel,
            trials,
            duration_secs,
            seat_counts,
            strategies: strategy_filter,
            output,
        } => {
            let base = kernel.into_config()?;
            info!(
                trials = trials,
                duration_secs = duration_secs,
                "Starting grid experiment"
            );

            let strategies: Vec<AcquisitionStrategy> = match strategy_filter {
                Some(names) => names
                    .iter()
                    .map(|s| s.parse())
                    .collect::<Result<_>>()?,
                None => AcquisitionStrategy::all(),
            };

            let mut results = GridResults::new();
            let total = strategies.len() * seat_counts.len() * trials;
            let mut completed = 0;

            for strategy in &strategies {
                for &seats in &seat_counts {
                    for trial in 0..trials {
                        let mut kernel = base.clone();
                        kernel.seats = seats;
                        kernel.slots = seats;
                        kernel.strategy = *strategy;
                        // a fixed seed seat may not exist at every size
                        if let SeedSeat::Fixed(seat) = base.seed_seat
                            && seat >= seats
                        {
                            kernel.seed_seat = SeedSeat::Random;
                        }
                        kernel.rng_seed = base.rng_seed.map(|seed| seed + trial as u64);
                        kernel.validate()?;

                        let config = ExperimentRunnerConfig {
                            kernel,
                            duration: Some(Duration::from_secs(duration_secs)),
                            ..Default::default()
                        };

                        let runner = ExperimentRunner::new(config);
                        let result = runner.run(trial).await?;

                        results.add(result);
                        completed += 1;

                        info!(
                            progress = format!("{}/{}", completed, total),
                            strategy = strategy.name(),
                            seats = seats,
                            trial = trial,
                            "Completed run"
                        );
                    }
                }
            }

            results.compute_summary();
            let output_path = timestamped_path(&output);
            results.save(&output_path)?;

            println!("\n=== Grid Experiment Complete ===");
            println!("Results saved to: {}", output_path.display());
            println!("\nSummary:");
            let mut keys: Vec<&String> = results.summary.keys().collect();
            keys.sort();
            for key in keys {
                let summary = &results.summary[key];
                println!(
                    "  {}: meals={:.1}±{:.1}, gap={:.1} (max {}), aborts={:.1}, stall_rate={:.1}% [{:.1}%, {:.1}%], max_waiting={}, violations={}",
                    key,
                    summary.avg_meals,
                    summary.avg_meals_se,
                    summary.avg_fairness_gap,
                    summary.max_fairness_gap,
                    summary.avg_starvation_aborts,
                    summary.stall_rate * 100.0,
                    summary.stall_rate_ci.0 * 100.0,
                    summary.stall_rate_ci.1 * 100.0,
                    summary.max_waiting,
                    summary.invariant_violations
                );
            }
        }

        Commands::Deadlock {
            kernel,
            max_secs,
            render_interval_ms,
            quiet,
        } => {
            let think_given = kernel.think_ms.is_some();
            let mut kernel = kernel.into_config()?;
            if !think_given {
                // seats re-contend at once, so the ring closes quickly
                kernel.delays.think = DelayRange::fixed(0);
            }
            kernel.strategy = AcquisitionStrategy::HoldAndWait {
                abort_on_timeout: false,
            };
            // every seat must be able to hold a slot at once
            kernel.fairness.promotion_cap = kernel.seats;

            info!(
                seats = kernel.seats,
                stall_threshold_ms = kernel.stall_threshold_ms(),
                "Reproducing hold-and-wait deadlock"
            );

            let config = ExperimentRunnerConfig {
                kernel,
                duration: Some(Duration::from_secs(max_secs)),
                render_interval_ms: (!quiet).then_some(render_interval_ms),
                stop_on_stall: true,
                handle_interrupt: true,
                ..Default::default()
            };

            let runner = ExperimentRunner::new(config);
            let result = runner.run(0).await?;

            println!("\n=== Deadlock Reproduction ===");
            match &result.first_stall {
                Some(stall) => {
                    println!(
                        "Watchdog flagged a stall at {} after {} without an admission",
                        format_duration(stall.at_ms),
                        format_duration(stall.quiet_ms)
                    );
                    println!("Seats waiting: {}", stall.waiting);
                    println!("Circular wait formed: {}", stall.circular_wait);
                }
                None => println!(
                    "No stall within {}s ({} meals served)",
                    max_secs,
                    result.total_meals()
                ),
            }
            println!("Deadlocked: {}", result.deadlocked());
        }
    }

    Ok(())
}
