//! Lifecycle states shared by image builds, targets, and compose reporting.
//!
//! Both enums use the same four wire names.  `ImageBuildState` is the
//! persisted per-build state machine; `ComposeState` is the externally
//! reported state derived from a queue job's status.

use serde::{Deserialize, Serialize};

/// State of a single image build (and of each of its targets).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageBuildState {
    #[default]
    Waiting,
    Running,
    Finished,
    Failed,
}

impl ImageBuildState {
    /// Whether this state is terminal (`Finished` or `Failed`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl std::fmt::Display for ImageBuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "WAITING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Externally visible state of a compose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComposeState {
    #[default]
    Waiting,
    Running,
    Finished,
    Failed,
}

impl std::fmt::Display for ComposeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "WAITING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
