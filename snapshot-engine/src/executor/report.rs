//! Outcome types for a backup run.

use crate::fs::MirrorSummary;
use crate::retention::RetentionReport;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle of one (drive, destination) unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    SourceCheck,
    Mirroring,
    Unreachable,
    Completed,
    MirrorError,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Unreachable | UnitState::Completed | UnitState::MirrorError
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Completed {
        elapsed: Duration,
        summary: MirrorSummary,
    },
    Unreachable,
    MirrorError(String),
}

impl UnitOutcome {
    pub fn state(&self) -> UnitState {
        match self {
            UnitOutcome::Completed { .. } => UnitState::Completed,
            UnitOutcome::Unreachable => UnitState::Unreachable,
            UnitOutcome::MirrorError(_) => UnitState::MirrorError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub drive: PathBuf,
    pub destination: PathBuf,
    pub snapshot: PathBuf,
    pub outcome: UnitOutcome,
}

/// A drive whose backup task died before reporting its units
#[derive(Debug, Clone)]
pub struct DriveFailure {
    pub drive: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub retention: RetentionReport,
    pub units: Vec<UnitReport>,
    pub drive_failures: Vec<DriveFailure>,
}

impl BackupReport {
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.units.len() - self.succeeded()
    }

    pub fn files_copied(&self) -> usize {
        self.units
            .iter()
            .filter_map(|u| match &u.outcome {
                UnitOutcome::Completed { summary, .. } => Some(summary.files_copied),
                _ => None,
            })
            .sum()
    }

    /// True when every unit completed and no drive task crashed
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.drive_failures.is_empty()
    }
}
