//! JSON-serializable types for the job queue payloads and the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use model::{ComposeResult, ImageBuildState, Target};

// ---------------------------------------------------------------------------
// Job-queue payloads
// ---------------------------------------------------------------------------

/// Argument document of an `osbuild` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OSBuildJob {
    pub manifest: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

/// Result document of an `osbuild` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OSBuildJobResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osbuild_output: Option<ComposeResult>,
}

// ---------------------------------------------------------------------------
// HTTP bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Body of `POST /job-queue/v1/jobs`; an empty object today.
#[derive(Debug, Deserialize)]
pub struct AddJobRequest {}

#[derive(Debug, Serialize)]
pub struct AddJobResponse {
    pub id: Uuid,
    pub manifest: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub status: ImageBuildState,
    pub result: Option<ComposeResult>,
}

#[derive(Debug, Serialize)]
pub struct UpdateJobResponse {}
