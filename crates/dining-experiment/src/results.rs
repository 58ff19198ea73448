//! Results collection and output for dining experiments.
//!
//! Captures metrics like:
//! - Meals served and fairness gap
//! - Starvation aborts and liveness stalls
//! - Peak number of simultaneous waiters
//! - Invariant violations

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use contention_kernel::FinalReport;

/// Configuration of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Strategy name
    pub strategy: String,
    /// Number of seats
    pub seats: usize,
    pub promotion_cap: usize,
    pub slack: u64,
    pub starvation_timeout_ms: u64,
    /// Planned run length, `None` for open-ended runs
    pub duration_ms: Option<u64>,
    /// Trial number (for repeated experiments)
    pub trial: usize,
    /// Random seed (if reproducible)
    pub seed: Option<u64>,
}

/// One sampled snapshot, reduced to counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetrics {
    pub at_ms: u64,
    pub waiting: usize,
    pub eating: usize,
    pub total_meals: u64,
    pub fairness_gap: u64,
}

/// First liveness stall of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallRecord {
    pub at_ms: u64,
    pub quiet_ms: u64,
    pub waiting: usize,
    /// Every seat was waiting on its left slot while holding its right one
    pub circular_wait: bool,
}

/// Results from a single experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub config: ExperimentConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Final table status
    pub report: FinalReport,
    /// Periodic samples
    pub samples: Vec<SampleMetrics>,
    /// Most seats seen Waiting in one sample
    pub max_waiting: usize,
    /// Largest fairness gap seen in one sample
    pub max_fairness_gap: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_stall: Option<StallRecord>,
    /// Invariant violations, rendered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ExperimentResult {
    /// Whether the run ended in the hold-and-wait deadlock.
    pub fn deadlocked(&self) -> bool {
        self.first_stall.is_some_and(|stall| stall.circular_wait)
    }

    pub fn total_meals(&self) -> u64 {
        self.report.total_meals()
    }
}

/// Aggregate results from a grid experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridResults {
    /// All individual results
    pub results: Vec<ExperimentResult>,
    /// Summary statistics by configuration
    pub summary: HashMap<String, ConfigSummary>,
}

/// Summary statistics for a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub config_key: String,
    pub trials: usize,
    pub avg_meals: f64,
    /// Standard error of avg_meals
    pub avg_meals_se: f64,
    pub avg_fairness_gap: f64,
    pub max_fairness_gap: u64,
    pub avg_starvation_aborts: f64,
    /// Share of trials with a liveness stall
    pub stall_rate: f64,
    /// Standard error of stall rate: sqrt(p(1-p)/n)
    pub stall_rate_se: f64,
    /// 95% confidence interval for stall rate: (lower, upper)
    pub stall_rate_ci: (f64, f64),
    pub max_waiting: usize,
    pub invariant_violations: u64,
}

impl GridResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: ExperimentResult) {
        self.results.push(result);
    }

    /// Compute summary statistics.
    pub fn compute_summary(&mut self) {
        let mut by_config: HashMap<String, Vec<&ExperimentResult>> = HashMap::new();
        for result in &self.results {
            let key = format!(
                "{}:seats={}:cap={}:slack={}",
                result.config.strategy,
                result.config.seats,
                result.config.promotion_cap,
                result.config.slack
            );
            by_config.entry(key).or_default().push(result);
        }

        for (key, results) in by_config {
            let trials = results.len();
            let n = trials as f64;

            let meals: Vec<f64> = results.iter().map(|r| r.total_meals() as f64).collect();
            let avg_meals = meals.iter().sum::<f64>() / n;
            // SE = std_dev / sqrt(n)
            let avg_meals_se = if trials > 1 {
                let variance =
                    meals.iter().map(|m| (m - avg_meals).powi(2)).sum::<f64>() / (n - 1.0);
                variance.sqrt() / n.sqrt()
            } else {
                0.0
            };

            let stalled = results.iter().filter(|r| r.first_stall.is_some()).count();
            let stall_rate = stalled as f64 / n;
            let stall_rate_se = if trials > 1 {
                (stall_rate * (1.0 - stall_rate) / n).sqrt()
            } else {
                0.0
            };
            // 95% CI: p ± 1.96 * SE, clamped to [0, 1]
            let z = 1.96;
            let stall_rate_ci = (
                (stall_rate - z * stall_rate_se).max(0.0),
                (stall_rate + z * stall_rate_se).min(1.0),
            );

            let avg_fairness_gap =
                results.iter().map(|r| r.report.fairness_gap as f64).sum::<f64>() / n;
            let max_fairness_gap = results.iter().map(|r| r.max_fairness_gap).max().unwrap_or(0);
            let avg_starvation_aborts = results
                .iter()
                .map(|r| r.report.totals.starvation_aborts as f64)
                .sum::<f64>()
                / n;
            let max_waiting = results.iter().map(|r| r.max_waiting).max().unwrap_or(0);
            let invariant_violations = results
                .iter()
                .map(|r| r.report.totals.invariant_violations)
                .sum();

            self.summary.insert(
                key.clone(),
                ConfigSummary {
                    config_key: key,
                    trials,
                    avg_meals,
                    avg_meals_se,
                    avg_fairness_gap,
                    max_fairness_gap,
                    avg_starvation_aborts,
                    stall_rate,
                    stall_rate_se,
                    stall_rate_ci,
                    max_waiting,
                    invariant_violations,
                },
            );
        }
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
pub fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}
