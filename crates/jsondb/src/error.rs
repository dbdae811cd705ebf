//! Typed error type for the jsondb crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonDbError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document '{name}' contains invalid JSON: {source}")]
    Invalid {
        name: String,
        source: serde_json::Error,
    },

    #[error("cannot encode document '{name}': {source}")]
    Encode {
        name: String,
        source: serde_json::Error,
    },
}
