//! Per-mod results of an update run

use std::fmt;

/// What happened to one queued mod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Installed; carries the new version
    Updated(String),
    /// No download showed up before the timeout
    TimedOut,
    /// No longer has an update pending or no listing to open
    Skipped(String),
    Failed(String),
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Updated(_))
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Updated(version) => write!(f, "updated to {}", version),
            UpdateOutcome::TimedOut => f.write_str("timed out waiting for download"),
            UpdateOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            UpdateOutcome::Failed(error) => write!(f, "failed: {}", error),
        }
    }
}

/// Tally over a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub updated: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl QueueSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a (String, UpdateOutcome)>) -> Self {
        let mut summary = Self::default();
        for (_, outcome) in outcomes {
            match outcome {
                UpdateOutcome::Updated(_) => summary.updated += 1,
                UpdateOutcome::TimedOut => summary.timed_out += 1,
                UpdateOutcome::Skipped(_) => summary.skipped += 1,
                UpdateOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.updated + self.timed_out + self.skipped + self.failed
    }
}
