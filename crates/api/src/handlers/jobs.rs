//! Handlers for the three job routes of the worker protocol.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use futures_util::{StreamExt, TryStreamExt};
use tokio_util::io::{StreamReader, SyncIoBridge};
use uuid::Uuid;

use queue::QueueError;

use crate::protocol::{
    AddJobRequest, AddJobResponse, OSBuildJob, OSBuildJobResult, UpdateJobRequest,
    UpdateJobResponse,
};
use crate::{ApiError, WorkerServer};

/// Map a body-extraction failure onto the protocol's error shape: a wrong
/// or missing content type is 415, an unparseable body is 400.
fn reject(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => ApiError::unsupported_media_type(),
        other => ApiError::bad_request(other.body_text()),
    }
}

/// `POST /job-queue/v1/jobs` — a worker claims the next `osbuild` job.
///
/// Blocks until a job is ready or the server shuts down.
pub async fn add_job(
    State(server): State<WorkerServer>,
    body: Result<Json<AddJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AddJobResponse>), ApiError> {
    let Json(_request) = body.map_err(reject)?;

    let (id, job): (Uuid, OSBuildJob) = server
        .queue
        .dequeue(&server.cancel, &["osbuild"])
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(AddJobResponse {
            id,
            manifest: job.manifest,
            targets: job.targets,
        }),
    ))
}

/// `PATCH /job-queue/v1/jobs/:job_id` — a worker reports a terminal status.
pub async fn update_job(
    State(server): State<WorkerServer>,
    Path(job_id): Path<String>,
    body: Result<Json<UpdateJobRequest>, JsonRejection>,
) -> Result<Json<UpdateJobResponse>, ApiError> {
    let id = Uuid::parse_str(&job_id)
        .map_err(|err| ApiError::bad_request(format!("cannot parse compose id: {err}")))?;

    let Json(request) = body.map_err(reject)?;

    // The queue cannot set a status before a job finishes; the worker never
    // sends anything but a terminal state.
    if !request.status.is_terminal() {
        return Err(ApiError::bad_request(
            "setting status of a job to waiting or running is not supported",
        ));
    }

    let result = OSBuildJobResult {
        osbuild_output: request.result,
    };
    server.queue.finish_job(id, &result).map_err(|err| match err {
        QueueError::NotExist => ApiError::not_found(format!("job does not exist: {id}")),
        QueueError::NotRunning => ApiError::bad_request(format!("job is not running: {id}")),
        other => ApiError::internal(other.to_string()),
    })?;

    Ok(Json(UpdateJobResponse {}))
}

/// `POST /job-queue/v1/jobs/:job_id/builds/:build_id/image` — a worker
/// streams the built image.
///
/// The body is piped into the configured image writer on a blocking
/// thread; without a writer it is drained and discarded.
pub async fn add_job_image(
    State(server): State<WorkerServer>,
    Path((job_id, build_id)): Path<(String, String)>,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let id = Uuid::parse_str(&job_id)
        .map_err(|err| ApiError::bad_request(format!("cannot parse compose id: {err}")))?;
    let build_id: usize = build_id
        .parse()
        .map_err(|err| ApiError::bad_request(format!("cannot parse image build id: {err}")))?;

    match server.image_writer.as_ref() {
        None => {
            let mut stream = body.into_data_stream();
            while let Some(chunk) = stream.next().await {
                chunk.map_err(|err| ApiError::internal(err.to_string()))?;
            }
        }
        Some(writer) => {
            let writer = Arc::clone(writer);
            let stream = body
                .into_data_stream()
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
            let reader = SyncIoBridge::new(StreamReader::new(stream));

            tokio::task::spawn_blocking(move || writer(id, build_id, Box::new(reader)))
                .await
                .map_err(|err| ApiError::internal(err.to_string()))?
                .map_err(|err| ApiError::internal(err.to_string()))?;
        }
    }

    Ok(StatusCode::OK)
}
