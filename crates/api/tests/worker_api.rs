//! End-to-end tests for the worker protocol, run against the router with
//! `oneshot` requests.

use std::io::Read;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

use api::{build_router, WorkerServer, WriteImageFn};
use model::{ComposeState, LocalTargetOptions, Target, TargetOptions};
use queue::JobQueue;

struct Fixture {
    _dir: tempfile::TempDir,
    server: WorkerServer,
    cancel: CancellationToken,
}

fn fixture_with_writer(image_writer: Option<Arc<WriteImageFn>>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(JobQueue::new(dir.path()).unwrap());
    let cancel = CancellationToken::new();
    let server = WorkerServer::new(queue, image_writer, cancel.clone());
    Fixture {
        _dir: dir,
        server,
        cancel,
    }
}

fn fixture() -> Fixture {
    fixture_with_writer(None)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn worker_claims_the_next_job() {
    let fixture = fixture();

    let target = Target::new(
        "disk.qcow2",
        TargetOptions::Local(LocalTargetOptions {
            filename: "disk.qcow2".into(),
        }),
    );
    let manifest = json!({ "pipeline": { "stages": [] } });
    let id = fixture
        .server
        .enqueue(manifest.clone(), vec![target])
        .unwrap();

    let response = build_router(fixture.server.clone())
        .oneshot(json_request("POST", "/job-queue/v1/jobs", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["id"], id.to_string());
    assert_eq!(body["manifest"], manifest);
    assert_eq!(body["targets"][0]["name"], "org.osbuild.local");

    // The job is running now.
    let (state, _) = fixture.server.job_status(id).unwrap();
    assert_eq!(state, ComposeState::Running);
}

#[tokio::test]
async fn claiming_requires_json_content_type() {
    let fixture = fixture();

    let request = Request::builder()
        .method("POST")
        .uri("/job-queue/v1/jobs")
        .header("content-type", "text/plain")
        .body(Body::from("{}"))
        .unwrap();

    let response = build_router(fixture.server)
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = body_json(response).await;
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn cancelled_server_reports_internal_error() {
    let fixture = fixture();
    fixture.cancel.cancel();

    let response = build_router(fixture.server)
        .oneshot(json_request("POST", "/job-queue/v1/jobs", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn finished_job_reports_success_and_failure() {
    let fixture = fixture();

    let id = fixture.server.enqueue(json!({}), vec![]).unwrap();
    let app = build_router(fixture.server.clone());

    app.clone()
        .oneshot(json_request("POST", "/job-queue/v1/jobs", json!({})))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/job-queue/v1/jobs/{id}"),
            json!({ "status": "FINISHED", "result": { "success": true } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));

    let (state, result) = fixture.server.job_result(id).unwrap();
    assert_eq!(state, ComposeState::Finished);
    assert!(result.unwrap().success);

    // Finishing twice is rejected: the job is no longer running.
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/job-queue/v1/jobs/{id}"),
            json!({ "status": "FINISHED", "result": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A job whose worker reported failure derives as failed.
    let failed = fixture.server.enqueue(json!({}), vec![]).unwrap();
    app.clone()
        .oneshot(json_request("POST", "/job-queue/v1/jobs", json!({})))
        .await
        .unwrap();
    app.clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/job-queue/v1/jobs/{failed}"),
            json!({ "status": "FAILED", "result": { "success": false } }),
        ))
        .await
        .unwrap();

    let (state, _) = fixture.server.job_status(failed).unwrap();
    assert_eq!(state, ComposeState::Failed);
}

#[tokio::test]
async fn update_rejects_bad_requests() {
    let fixture = fixture();
    let app = build_router(fixture.server.clone());

    // Non-terminal statuses are not supported.
    let id = fixture.server.enqueue(json!({}), vec![]).unwrap();
    app.clone()
        .oneshot(json_request("POST", "/job-queue/v1/jobs", json!({})))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/job-queue/v1/jobs/{id}"),
            json!({ "status": "RUNNING", "result": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown job id.
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/job-queue/v1/jobs/{}", Uuid::new_v4()),
            json!({ "status": "FINISHED", "result": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unparseable job id.
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            "/job-queue/v1/jobs/not-a-uuid",
            json!({ "status": "FINISHED", "result": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown state name.
    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/job-queue/v1/jobs/{id}"),
            json!({ "status": "EXPLODED", "result": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn image_upload_reaches_the_writer() {
    let received: Arc<Mutex<Vec<(Uuid, usize, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let writer: Arc<WriteImageFn> = {
        let received = Arc::clone(&received);
        Arc::new(move |id, build_id, mut reader| {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            received.lock().unwrap().push((id, build_id, bytes));
            Ok(())
        })
    };
    let fixture = fixture_with_writer(Some(writer));

    let id = Uuid::new_v4();
    let request = Request::builder()
        .method("POST")
        .uri(format!("/job-queue/v1/jobs/{id}/builds/0/image"))
        .body(Body::from("image-bytes"))
        .unwrap();

    let response = build_router(fixture.server)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, id);
    assert_eq!(received[0].1, 0);
    assert_eq!(received[0].2, b"image-bytes");
}

#[tokio::test]
async fn image_upload_without_writer_is_discarded() {
    let fixture = fixture();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/job-queue/v1/jobs/{}/builds/0/image", Uuid::new_v4()))
        .body(Body::from(vec![0u8; 64 * 1024]))
        .unwrap();

    let response = build_router(fixture.server)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_routes_and_methods_are_rejected() {
    let fixture = fixture();
    let app = build_router(fixture.server);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/job-queue/v1/elsewhere", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["message"].is_string());

    let response = app
        .oneshot(json_request("DELETE", "/job-queue/v1/jobs", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
