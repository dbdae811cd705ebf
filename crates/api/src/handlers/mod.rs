//! HTTP handlers for the worker protocol.

pub mod jobs;

use crate::ApiError;

/// Fallback for paths outside the protocol.
pub async fn not_found() -> ApiError {
    ApiError::not_found("not found")
}

/// Fallback for known paths hit with the wrong method.
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
