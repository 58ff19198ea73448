//! Global liveness watchdog.
//!
//! Fed periodically with the admission counter and the number of waiting
//! seats, it flags a stall when seats are waiting but nobody has been
//! admitted to eat for `stall_intervals` starvation timeouts. The protocol
//! never detects its own deadlocks; this is the external check that does.

/// A detected stall episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    /// When the stall was flagged
    pub at_ms: u64,
    /// Time since the last admission
    pub quiet_ms: u64,
    /// Seats waiting when flagged
    pub waiting: usize,
}

#[derive(Debug, Clone)]
pub struct LivenessWatchdog {
    threshold_ms: u64,
    last_admissions: u64,
    last_progress_ms: u64,
    stalled: bool,
    episodes: u64,
}

impl LivenessWatchdog {
    /// Watchdog flagging `threshold_ms` of quiet, starting its clock at `now_ms`.
    pub fn new(threshold_ms: u64, now_ms: u64) -> Self {
        Self {
            threshold_ms,
            last_admissions: 0,
            last_progress_ms: now_ms,
            stalled: false,
            episodes: 0,
        }
    }

    /// Feed one sample. Returns a [`Stall`] the first time an episode is
    /// detected; further samples in the same episode return `None`.
    pub fn observe(&mut self, now_ms: u64, admissions: u64, waiting: usize) -> Option<Stall> {
        if admissions != self.last_admissions || waiting == 0 {
            // progress, or nobody is asking for progress
            self.last_admissions = admissions;
            self.last_progress_ms = now_ms;
            self.stalled = false;
            return None;
        }

        let quiet_ms = now_ms.saturating_sub(self.last_progress_ms);
        if self.stalled || quiet_ms < self.threshold_ms {
            return None;
        }
        self.stalled = true;
        self.episodes += 1;
        Some(Stall {
            at_ms: now_ms,
            quiet_ms,
            waiting,
        })
    }

    /// Whether the current episode has been flagged.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Number of distinct stall episodes flagged.
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }
}
