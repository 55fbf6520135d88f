//! Lifecycle states shared by media items and conversion jobs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of a job (and of the media item it drives).
///
/// The success path is strictly linear:
/// `Pending -> Downloading -> Processing -> Converting -> Organizing -> Completed`.
/// `Failed` and `Cancelled` are reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and persisted, waiting for a worker.
    Pending,
    /// Source is being fetched.
    Downloading,
    /// Downloaded files are being validated and probed.
    Processing,
    /// Converter backend is running.
    Converting,
    /// Output is being moved into the taxonomy.
    Organizing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    /// Every state, in pipeline order followed by the terminal escapes.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Downloading,
        Self::Processing,
        Self::Converting,
        Self::Organizing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Converting => "converting",
            Self::Organizing => "organizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True for the phases a worker is actively driving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Downloading | Self::Processing | Self::Converting | Self::Organizing
        )
    }

    /// The next phase on the success path, if any.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Downloading),
            Self::Downloading => Some(Self::Processing),
            Self::Processing => Some(Self::Converting),
            Self::Converting => Some(Self::Organizing),
            Self::Organizing => Some(Self::Completed),
            Self::Completed | Self::Failed | Self::Cancelled => None,
        }
    }

    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            Self::Failed | Self::Cancelled => true,
            other => self.next() == Some(other),
        }
    }

    /// Validates a transition, returning the target on success.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the move is not in the table.
    pub fn transition(self, target: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid job status: {s}"))
    }
}
