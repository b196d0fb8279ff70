//! Media lifecycle state machine.
//!
//! ```text
//! Pending -> Validating -> Transcoding -> AwaitingIntro -> Approved -> Archived
//!               |              |
//!               +--> Failed <--+          Failed -> Pending (manual retry)
//! ```
//!
//! Every status change goes through [`MediaStatus::transition`]; pairs that are not
//! in the table are rejected.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Pending,
    Validating,
    Transcoding,
    AwaitingIntro,
    Approved,
    Archived,
    Failed,
}

const TRANSITIONS: &[(MediaStatus, MediaStatus)] = &[
    (MediaStatus::Pending, MediaStatus::Validating),
    (MediaStatus::Validating, MediaStatus::Transcoding),
    (MediaStatus::Validating, MediaStatus::Failed),
    (MediaStatus::Transcoding, MediaStatus::AwaitingIntro),
    (MediaStatus::Transcoding, MediaStatus::Failed),
    (MediaStatus::AwaitingIntro, MediaStatus::Approved),
    (MediaStatus::Approved, MediaStatus::Archived),
    (MediaStatus::Failed, MediaStatus::Pending),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal media transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: MediaStatus,
    pub to: MediaStatus,
}

impl MediaStatus {
    pub const ALL: [MediaStatus; 7] = [
        MediaStatus::Pending,
        MediaStatus::Validating,
        MediaStatus::Transcoding,
        MediaStatus::AwaitingIntro,
        MediaStatus::Approved,
        MediaStatus::Archived,
        MediaStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Pending => "pending",
            MediaStatus::Validating => "validating",
            MediaStatus::Transcoding => "transcoding",
            MediaStatus::AwaitingIntro => "awaiting_intro",
            MediaStatus::Approved => "approved",
            MediaStatus::Archived => "archived",
            MediaStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: MediaStatus) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    /// Validate a transition against the table and return the new status.
    pub fn transition(self, next: MediaStatus) -> Result<MediaStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Only Approved items may be placed on a playlist.
    pub fn is_playable(self) -> bool {
        self == MediaStatus::Approved
    }

    /// Archived items keep their metadata row but no artifacts.
    pub fn is_storage_backed(self) -> bool {
        self != MediaStatus::Archived
    }

    /// Stages the background pipeline still has to drive.
    pub fn is_in_pipeline(self) -> bool {
        matches!(
            self,
            MediaStatus::Pending
                | MediaStatus::Validating
                | MediaStatus::Transcoding
                | MediaStatus::AwaitingIntro
        )
    }
}

impl Display for MediaStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid media status: {}", s))
    }
}
