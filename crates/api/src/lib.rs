//! `api` crate — worker-facing HTTP layer.
//!
//! Exposes:
//!   POST   /job-queue/v1/jobs                                   — claim the next build job
//!   PATCH  /job-queue/v1/jobs/:job_id                           — report a terminal status
//!   POST   /job-queue/v1/jobs/:job_id/builds/:build_id/image    — stream the built image
//!
//! The façade owns nothing: it holds a handle to the job queue and an
//! optional callback for writing uploaded images.  Compose-level state is
//! derived from queue job status on demand, never stored here.

pub mod error;
pub mod handlers;
pub mod protocol;

pub use error::ApiError;

use std::io::{self, Read};
use std::sync::Arc;

use axum::routing::{patch, post};
use axum::Router;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use model::{ComposeResult, ComposeState, Target};
use queue::{JobQueue, JobState, JobStatus, QueueError};

use protocol::{OSBuildJob, OSBuildJobResult};

/// Callback that consumes an uploaded image for one image build.
///
/// Invoked on a blocking thread; the reader yields the raw request body.
pub type WriteImageFn =
    dyn Fn(Uuid, usize, Box<dyn Read + Send>) -> io::Result<()> + Send + Sync;

/// Shared state behind the worker-facing routes.
#[derive(Clone)]
pub struct WorkerServer {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) image_writer: Option<Arc<WriteImageFn>>,
    /// Cancelled on shutdown; aborts blocked dequeues.
    pub(crate) cancel: CancellationToken,
}

impl WorkerServer {
    pub fn new(
        queue: Arc<JobQueue>,
        image_writer: Option<Arc<WriteImageFn>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            image_writer,
            cancel,
        }
    }

    /// Queue an `osbuild` job for the given manifest and targets on behalf
    /// of a client.
    pub fn enqueue(&self, manifest: Value, targets: Vec<Target>) -> Result<Uuid, QueueError> {
        let job = OSBuildJob { manifest, targets };
        self.queue.enqueue("osbuild", &job, &[])
    }

    /// The compose-level state derived from a job's queue status, together
    /// with the raw queue status snapshot.
    pub fn job_status(&self, id: Uuid) -> Result<(ComposeState, JobStatus), QueueError> {
        let status = self.queue.job_status(id)?;
        let result = decode_result(&status);
        let state = compose_state_from_job_status(status.state, result.as_ref());
        Ok((state, status))
    }

    /// The compose-level state and the worker's result, if any.
    pub fn job_result(
        &self,
        id: Uuid,
    ) -> Result<(ComposeState, Option<ComposeResult>), QueueError> {
        let status = self.queue.job_status(id)?;
        let result = decode_result(&status);
        let state = compose_state_from_job_status(status.state, result.as_ref());
        Ok((state, result.and_then(|r| r.osbuild_output)))
    }
}

fn decode_result(status: &JobStatus) -> Option<OSBuildJobResult> {
    status
        .result
        .as_ref()
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Project a queue job status onto the externally reported compose state.
///
/// A finished job only counts as `Finished` when the worker reported
/// success; everything else a finished job can carry means `Failed`.
fn compose_state_from_job_status(
    state: JobState,
    result: Option<&OSBuildJobResult>,
) -> ComposeState {
    match state {
        JobState::Pending => ComposeState::Waiting,
        JobState::Running => ComposeState::Running,
        JobState::Finished => {
            let success = result
                .and_then(|r| r.osbuild_output.as_ref())
                .map(|output| output.success)
                .unwrap_or(false);
            if success {
                ComposeState::Finished
            } else {
                ComposeState::Failed
            }
        }
    }
}

/// Build the worker-facing router.
pub fn build_router(server: WorkerServer) -> Router {
    Router::new()
        .route(
            "/job-queue/v1/jobs",
            post(handlers::jobs::add_job).fallback(handlers::method_not_allowed),
        )
        .route(
            "/job-queue/v1/jobs/:job_id",
            patch(handlers::jobs::update_job).fallback(handlers::method_not_allowed),
        )
        .route(
            "/job-queue/v1/jobs/:job_id/builds/:build_id/image",
            post(handlers::jobs::add_job_image).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Bind `bind` and serve the worker API until the process ends.
pub async fn serve(bind: &str, server: WorkerServer) -> Result<(), std::io::Error> {
    let app = build_router(server);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("worker API listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
