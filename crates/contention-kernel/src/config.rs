//! Configuration types for the kernel.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level kernel configuration.
///
/// This defines the table size, the acquisition strategy, fairness
/// arbitration, and simulated timing. Loaded from JSON at runtime or built
/// in code from [`KernelConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Number of seats around the table (N)
    pub seats: usize,

    /// Number of resource slots; must equal `seats` for the ring topology
    pub slots: usize,

    /// Backoff between two ticks of the same seat (milliseconds)
    pub tick_interval_ms: u64,

    /// Cadence of the fairness controller (milliseconds)
    pub fairness_interval_ms: u64,

    /// Maximum time a seat may stay in Waiting (milliseconds)
    pub starvation_timeout_ms: u64,

    /// Acquisition strategy used by every seat
    pub strategy: AcquisitionStrategy,

    /// Fairness arbitration
    pub fairness: FairnessConfig,

    /// Simulated think/eat durations
    pub delays: DelayConfig,

    /// Liveness watchdog
    pub watchdog: WatchdogConfig,

    /// Seat forced into Waiting at startup
    pub seed_seat: SeedSeat,

    /// Seed for every random choice of the run (OS entropy when unset)
    pub rng_seed: Option<u64>,

    /// Stop the run on the first safety invariant violation
    pub strict_invariants: bool,
}

/// Which seat, if any, starts the run in Waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSeat {
    /// One seat picked uniformly at random
    #[default]
    Random,
    /// This seat
    Fixed(usize),
    /// Every seat starts Thinking; the first promotion pass seats the contenders
    None,
}

impl SeedSeat {
    /// The fixed seat, if one is configured.
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Self::Fixed(seat) => Some(*seat),
            Self::Random | Self::None => None,
        }
    }
}

/// Fairness controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessConfig {
    /// Tolerated gap between a seat's meal count and the population minimum
    pub slack: u64,

    /// Maximum number of seats simultaneously in Waiting after a promotion pass
    pub promotion_cap: usize,
}

/// Inclusive range of simulated durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    /// Fixed duration.
    pub const fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }

    /// Inclusive range `min_ms..=max_ms`.
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }
}

/// Think/eat timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Duration of a thinking pause
    pub think: DelayRange,

    /// Duration of a meal
    pub eat: DelayRange,
}

/// Liveness watchdog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Starvation timeouts without any admission before a stall is flagged (K)
    pub stall_intervals: u32,

    /// How often the watchdog samples the table (milliseconds)
    pub check_interval_ms: u64,
}

/// How a Waiting seat turns into an Eating seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcquisitionStrategy {
    /// Priority-checked admission under the arbitration lock (safe)
    Ordered,

    /// Claim the right slot, then poll the left one without releasing (deadlock-prone)
    HoldAndWait {
        /// Release the right slot and go back to Thinking after the starvation timeout
        abort_on_timeout: bool,
    },
}

impl AcquisitionStrategy {
    /// Get the name of this strategy.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ordered => "ordered",
            Self::HoldAndWait {
                abort_on_timeout: true,
            } => "hold_and_wait",
            Self::HoldAndWait {
                abort_on_timeout: false,
            } => "hold_and_wait_no_timeout",
        }
    }

    /// Get all strategies for grid experiments.
    pub fn all() -> Vec<Self> {
        vec![
            Self::Ordered,
            Self::HoldAndWait {
                abort_on_timeout: true,
            },
            Self::HoldAndWait {
                abort_on_timeout: false,
            },
        ]
    }

    /// Whether a seat waiting under this strategy is bounded by the starvation timeout.
    pub fn aborts_on_timeout(&self) -> bool {
        match self {
            Self::Ordered => true,
            Self::HoldAndWait { abort_on_timeout } => *abort_on_timeout,
        }
    }
}

impl std::str::FromStr for AcquisitionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ordered" | "checked" | "safe" => Ok(Self::Ordered),
            "hold_and_wait" | "hold-and-wait" | "hw" => Ok(Self::HoldAndWait {
                abort_on_timeout: true,
            }),
            "hold_and_wait_no_timeout" | "hold-and-wait-no-timeout" | "deadlock" => {
                Ok(Self::HoldAndWait {
                    abort_on_timeout: false,
                })
            }
            _ => bail!(
                "Unknown strategy: {}. Valid: ordered, hold_and_wait, hold_and_wait_no_timeout",
                s
            ),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            seats: 5,
            slots: 5,
            tick_interval_ms: 50,
            fairness_interval_ms: 50,
            starvation_timeout_ms: 6_000,
            strategy: AcquisitionStrategy::Ordered,
            fairness: FairnessConfig::default(),
            delays: DelayConfig::default(),
            watchdog: WatchdogConfig::default(),
            seed_seat: SeedSeat::Random,
            rng_seed: None,
            strict_invariants: cfg!(debug_assertions),
        }
    }
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            slack: 1,
            promotion_cap: 2,
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            think: DelayRange::new(2_000, 5_000),
            eat: DelayRange::new(1_000, 4_000),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_intervals: 3,
            check_interval_ms: 250,
        }
    }
}

impl KernelConfig {
    /// Configuration for a table of `seats` seats with everything else at its default.
    pub fn with_seats(seats: usize) -> Self {
        Self {
            seats,
            slots: seats,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading kernel config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing kernel config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.seats < 2 {
            bail!("a table needs at least 2 seats, got {}", self.seats);
        }
        if self.slots != self.seats {
            bail!(
                "ring topology needs one slot per seat: {} seats, {} slots",
                self.seats,
                self.slots
            );
        }
        if self.tick_interval_ms == 0 || self.fairness_interval_ms == 0 {
            bail!("tick and fairness intervals must be positive");
        }
        if self.starvation_timeout_ms == 0 {
            bail!("starvation timeout must be positive");
        }
        if self.fairness.promotion_cap == 0 {
            bail!("promotion cap must be at least 1");
        }
        for (name, range) in [("think", self.delays.think), ("eat", self.delays.eat)] {
            if range.min_ms > range.max_ms {
                bail!(
                    "{} delay range is inverted: {}..={}",
                    name,
                    range.min_ms,
                    range.max_ms
                );
            }
        }
        if self.watchdog.stall_intervals == 0 || self.watchdog.check_interval_ms == 0 {
            bail!("watchdog needs a positive stall interval count and check interval");
        }
        if let Some(seed) = self.seed_seat.fixed()
            && seed >= self.seats
        {
            bail!("seed seat {} is outside 0..{}", seed, self.seats);
        }
        Ok(())
    }

    /// Half the starvation timeout: from here on a waiting seat has priority.
    pub fn priority_threshold_ms(&self) -> u64 {
        self.starvation_timeout_ms / 2
    }

    /// Quiet period after which the watchdog flags a stall.
    pub fn stall_threshold_ms(&self) -> u64 {
        self.starvation_timeout_ms
            .saturating_mul(u64::from(self.watchdog.stall_intervals))
    }
}
