//! Update State Machine Types
//!
//! Explicit states for one update attempt, the request it runs against and
//! the events reported to the host.

use super::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether a downloaded artifact must pass identity verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    Enabled,
    Disabled,
}

impl VerificationPolicy {
    /// Parse the `runtime_verify` metadata value.
    ///
    /// Only `disable` and `false` (any case, no surrounding whitespace) turn
    /// verification off; anything else, including an absent key, keeps it on.
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("disable") || v.eq_ignore_ascii_case("false") => {
                Self::Disabled
            }
            _ => Self::Enabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Immutable per-attempt data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Resolved download URL (may be empty when nothing is configured)
    pub url: String,
    pub verification: VerificationPolicy,
    /// Where the runtime gets extracted
    pub dest_dir: PathBuf,
    /// Where the transport writes the artifact
    pub download_dir: PathBuf,
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Completed,
    Cancelled,
    Failed(UpdateError),
}

impl UpdateOutcome {
    /// `Ok` only for a completed attempt; cancellation maps to `UserCancelled`
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Cancelled => Err(UpdateError::UserCancelled),
            Self::Failed(e) => Err(e),
        }
    }
}

/// Coordinator state; exactly one value describes the whole attempt
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum UpdateState {
    /// No attempt in progress
    #[default]
    Idle,
    /// Foreground dialog waiting for the user
    AwaitingUserDecision,
    /// Download session running
    Downloading,
    /// Checking the artifact's signing identity
    Verifying,
    /// Extracting the artifact
    Installing,
    /// Attempt finished, dispatch pending
    Terminal(UpdateOutcome),
}

impl UpdateState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Events delivered to the host listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum UpdateEvent {
    Started,
    Progress(u8),
    Cancelled,
    Failed(UpdateError),
    Completed,
}

impl From<UpdateOutcome> for UpdateEvent {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Completed => Self::Completed,
            UpdateOutcome::Cancelled => Self::Cancelled,
            UpdateOutcome::Failed(e) => Self::Failed(e),
        }
    }
}
