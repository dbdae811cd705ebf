//! Typed error type for the queue crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job does not exist")]
    NotExist,

    #[error("job is not running")]
    NotRunning,

    #[error("dequeue was cancelled")]
    Cancelled,

    #[error("invalid job '{0}' in queue directory")]
    InvalidJobId(String),

    #[error("error marshaling job arguments: {0}")]
    MarshalArgs(#[source] serde_json::Error),

    #[error("error unmarshaling arguments for job '{id}': {source}")]
    UnmarshalArgs {
        id: Uuid,
        source: serde_json::Error,
    },

    #[error("error marshaling job result: {0}")]
    MarshalResult(#[source] serde_json::Error),

    #[error(transparent)]
    Db(#[from] jsondb::JsonDbError),
}
