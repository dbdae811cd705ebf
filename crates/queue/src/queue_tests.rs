//! Tests for the job queue: scheduling, argument round-trips, dependency
//! handling, cancellation, and crash recovery.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{JobQueue, JobState, QueueError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Args {
    i: i64,
    s: String,
}

fn temp_queue() -> (tempfile::TempDir, JobQueue) {
    let dir = tempfile::tempdir().unwrap();
    let queue = JobQueue::new(dir.path()).unwrap();
    (dir, queue)
}

/// Dequeue the next job of `job_type` and immediately finish it.
async fn finish_next(queue: &JobQueue, job_type: &str, result: Value) -> Uuid {
    let cancel = CancellationToken::new();
    let (id, _args): (Uuid, Value) = queue.dequeue(&cancel, &[job_type]).await.unwrap();
    queue.finish_job(id, &result).unwrap();
    id
}

#[test]
fn nonexistent_directory_fails() {
    assert!(JobQueue::new("/nonexistent-queue-directory").is_err());
}

#[test]
fn unserializable_args_are_rejected() {
    let (dir, queue) = temp_queue();

    // Maps with non-string keys cannot be encoded as JSON objects.
    let args: std::collections::HashMap<Vec<u8>, i32> =
        [(vec![1u8, 2u8], 3)].into_iter().collect();
    let result = queue.enqueue("test", &args, &[]);
    assert!(matches!(result, Err(QueueError::MarshalArgs(_))));

    // Nothing may have been persisted.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn unknown_dependency_is_rejected() {
    let (dir, queue) = temp_queue();

    let result = queue.enqueue("test", &json!("arg0"), &[Uuid::new_v4()]);
    assert!(matches!(result, Err(QueueError::NotExist)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn args_round_trip_per_type() {
    let (_dir, queue) = temp_queue();
    let cancel = CancellationToken::new();

    let one_args = Args { i: 7, s: "🐠".into() };
    let one = queue.enqueue("fish", &one_args, &[]).unwrap();

    let two_args = Args { i: 42, s: "🐙".into() };
    let two = queue.enqueue("octopus", &two_args, &[]).unwrap();

    let (id, args): (Uuid, Args) = queue.dequeue(&cancel, &["octopus"]).await.unwrap();
    assert_eq!(id, two);
    assert_eq!(args, two_args);

    let (id, args): (Uuid, Args) = queue.dequeue(&cancel, &["fish"]).await.unwrap();
    assert_eq!(id, one);
    assert_eq!(args, one_args);
}

#[tokio::test]
async fn fifo_within_one_type() {
    let (_dir, queue) = temp_queue();
    let cancel = CancellationToken::new();

    let ids: Vec<Uuid> = (0..3)
        .map(|n| queue.enqueue("test", &json!({ "n": n }), &[]).unwrap())
        .collect();

    for expected in ids {
        let (id, _): (Uuid, Value) = queue.dequeue(&cancel, &["test"]).await.unwrap();
        assert_eq!(id, expected);
        queue.finish_job(id, &json!({})).unwrap();
    }
}

#[tokio::test]
async fn cancelled_dequeue_returns_without_touching_state() {
    let (dir, queue) = temp_queue();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result: Result<(Uuid, Value), _> = queue.dequeue(&cancel, &["zebra"]).await;
    assert!(matches!(result, Err(QueueError::Cancelled)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn dequeue_blocks_until_a_job_arrives() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(JobQueue::new(dir.path()).unwrap());

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let (id, _): (Uuid, Value) = queue.dequeue(&cancel, &["slow"]).await.unwrap();
            id
        })
    };

    // Give the waiter a chance to block before anything is queued.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = queue.enqueue("slow", &json!({}), &[]).unwrap();

    let dequeued = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("dequeue should have been woken")
        .unwrap();
    assert_eq!(dequeued, id);
}

#[tokio::test]
async fn job_is_dequeued_at_most_once() {
    let (_dir, queue) = temp_queue();
    let cancel = CancellationToken::new();

    let id = queue.enqueue("test", &json!({}), &[]).unwrap();
    let (dequeued, _): (Uuid, Value) = queue.dequeue(&cancel, &["test"]).await.unwrap();
    assert_eq!(dequeued, id);

    let second = tokio::time::timeout(
        Duration::from_millis(50),
        queue.dequeue::<Value>(&cancel, &["test"]),
    )
    .await;
    assert!(second.is_err(), "no second job should become available");
}

#[tokio::test]
async fn dependencies_done_before_pushing_dependant() {
    let (_dir, queue) = temp_queue();

    let one = queue.enqueue("test", &json!(null), &[]).unwrap();
    let two = queue.enqueue("test", &json!(null), &[]).unwrap();

    let mut done = vec![
        finish_next(&queue, "test", json!({})).await,
        finish_next(&queue, "test", json!({})).await,
    ];
    done.sort();
    let mut expected = vec![one, two];
    expected.sort();
    assert_eq!(done, expected);

    let dependant = queue.enqueue("test", &json!(null), &[one, two]).unwrap();
    assert_eq!(
        queue.job_status(dependant).unwrap().state,
        JobState::Pending
    );

    assert_eq!(finish_next(&queue, "test", json!({})).await, dependant);
    assert_eq!(
        queue.job_status(dependant).unwrap().state,
        JobState::Finished
    );
}

#[tokio::test]
async fn dependencies_done_after_pushing_dependant() {
    let (_dir, queue) = temp_queue();

    let one = queue.enqueue("test", &json!(null), &[]).unwrap();
    let two = queue.enqueue("test", &json!(null), &[]).unwrap();

    let dependant = queue.enqueue("test", &json!(null), &[one, two]).unwrap();
    assert_eq!(
        queue.job_status(dependant).unwrap().state,
        JobState::Pending
    );

    // Finishing only the first dependency must not release the dependant.
    let first = finish_next(&queue, "test", json!({})).await;
    assert!(first == one || first == two);
    assert_eq!(
        queue.job_status(dependant).unwrap().state,
        JobState::Pending
    );

    let second = finish_next(&queue, "test", json!({})).await;
    assert!(second == one || second == two);
    assert_ne!(first, second);

    assert_eq!(finish_next(&queue, "test", json!({})).await, dependant);
}

#[tokio::test]
async fn duplicate_dependencies_collapse() {
    let (_dir, queue) = temp_queue();

    let dep = queue.enqueue("test", &json!(null), &[]).unwrap();
    finish_next(&queue, "test", json!({})).await;

    // The same dependency three times must not block the job.
    let id = queue.enqueue("test", &json!(null), &[dep, dep, dep]).unwrap();
    assert_eq!(finish_next(&queue, "test", json!({})).await, id);
}

#[test]
fn finish_requires_a_running_job() {
    let (_dir, queue) = temp_queue();

    let id = queue.enqueue("test", &json!({}), &[]).unwrap();
    assert!(matches!(
        queue.finish_job(id, &json!({})),
        Err(QueueError::NotRunning)
    ));

    assert!(matches!(
        queue.finish_job(Uuid::new_v4(), &json!({})),
        Err(QueueError::NotExist)
    ));
}

#[tokio::test]
async fn status_reports_timestamps_and_result() {
    let (_dir, queue) = temp_queue();
    let cancel = CancellationToken::new();

    let id = queue.enqueue("test", &json!({ "a": 1 }), &[]).unwrap();

    let status = queue.job_status(id).unwrap();
    assert_eq!(status.state, JobState::Pending);
    assert!(status.started_at.is_none());
    assert!(status.finished_at.is_none());
    assert!(status.result.is_none());

    let (_, _args): (Uuid, Value) = queue.dequeue(&cancel, &["test"]).await.unwrap();
    queue.finish_job(id, &json!({ "success": true })).unwrap();

    let status = queue.job_status(id).unwrap();
    assert_eq!(status.state, JobState::Finished);
    let started = status.started_at.unwrap();
    let finished = status.finished_at.unwrap();
    assert!(status.queued_at <= started);
    assert!(started <= finished);
    assert_eq!(status.result.unwrap(), json!({ "success": true }));

    assert!(matches!(
        queue.job_status(Uuid::new_v4()),
        Err(QueueError::NotExist)
    ));
}

#[tokio::test]
async fn restart_recovers_pending_and_preserves_finished() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let (finished, ready, blocked, running) = {
        let queue = JobQueue::new(dir.path()).unwrap();

        let finished = queue.enqueue("test", &json!({ "n": 1 }), &[]).unwrap();
        let (id, _): (Uuid, Value) = queue.dequeue(&cancel, &["test"]).await.unwrap();
        assert_eq!(id, finished);
        queue.finish_job(finished, &json!({ "ok": true })).unwrap();

        let ready = queue.enqueue("test", &json!({ "n": 2 }), &[]).unwrap();
        let blocked = queue
            .enqueue("test", &json!({ "n": 3 }), &[ready])
            .unwrap();

        let running = queue.enqueue("other", &json!({ "n": 4 }), &[]).unwrap();
        let (id, _): (Uuid, Value) = queue.dequeue(&cancel, &["other"]).await.unwrap();
        assert_eq!(id, running);

        (finished, ready, blocked, running)
    };

    // A fresh queue over the same directory sees the same world.
    let queue = JobQueue::new(dir.path()).unwrap();

    let status = queue.job_status(finished).unwrap();
    assert_eq!(status.state, JobState::Finished);
    assert_eq!(status.result.unwrap(), json!({ "ok": true }));

    // The running job stays running on disk and is not re-queued.
    assert_eq!(queue.job_status(running).unwrap().state, JobState::Running);
    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        queue.dequeue::<Value>(&cancel, &["other"]),
    )
    .await;
    assert!(timed_out.is_err());

    // The ready job comes back first; finishing it releases the blocked one.
    let (id, args): (Uuid, Value) = queue.dequeue(&cancel, &["test"]).await.unwrap();
    assert_eq!(id, ready);
    assert_eq!(args, json!({ "n": 2 }));
    queue.finish_job(ready, &json!({})).unwrap();

    let (id, _): (Uuid, Value) = queue.dequeue(&cancel, &["test"]).await.unwrap();
    assert_eq!(id, blocked);
}
