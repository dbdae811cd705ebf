//! Typed error type for the store crate.
//!
//! Only recoverable conditions appear here.  A failure to persist the
//! state document is not recoverable (memory and disk have diverged) and
//! panics instead; see `Store::change`.

use model::{BlueprintError, StateTransitionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown blueprint: {0}")]
    UnknownBlueprint(String),

    #[error("unknown commit")]
    UnknownCommit,

    #[error("no commits for blueprint: {0}")]
    NoCommits(String),

    #[error("compose does not exist")]
    ComposeNotFound,

    #[error("image build does not exist")]
    ImageBuildNotFound,

    #[error("compose has not been popped")]
    NotPending,

    #[error("invalid state transition: {0}")]
    InvalidRequest(#[from] StateTransitionError),

    #[error("compose does not have local target")]
    NoLocalTarget,

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
