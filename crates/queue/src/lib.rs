//! `queue` crate — filesystem-backed, dependency-aware job queue.
//!
//! Jobs are persisted as one JSON document each through `jsondb`.  The
//! queue keeps no job data in memory between operations; every access
//! re-reads the document, so the disk is the single source of truth and a
//! restart rebuilds the runtime indices from it.  What *is* kept in memory
//! are the two structures needed for efficient scheduling: per-type FIFO
//! lists of ready jobs, and a reverse-dependency index from unfinished
//! jobs to the pending jobs waiting on them.
//!
//! A queue directory must be owned by exactly one `JobQueue` at a time; a
//! single `JobQueue` can be shared freely across tasks.

pub mod error;

pub use error::QueueError;

#[cfg(test)]
mod queue_tests;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use jsondb::JsonDatabase;

/// Queue-level status of a job.
///
/// There is no `Failed` here: whether a finished job succeeded is encoded
/// inside its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
}

/// On-disk job document.  Contains all necessary (but non-redundant)
/// information about a job; (de)serialized on each access.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Job {
    id: Uuid,
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default)]
    args: Value,
    dependencies: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,

    status: JobState,
    #[serde(rename = "queued-at")]
    queued_at: DateTime<Utc>,
    #[serde(rename = "started-at", skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finished-at", skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

/// Snapshot of a job's status as reported by [`JobQueue::job_status`].
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The job's result document; present iff the job is finished.
    pub result: Option<Value>,
}

/// A durable queue of typed jobs with inter-job dependencies.
pub struct JobQueue {
    db: JsonDatabase,

    /// Per-type FIFO lists of jobs that are ready to be dequeued.  Lists
    /// are created lazily on first reference.
    pending: Mutex<HashMap<String, VecDeque<Uuid>>>,

    /// Maps job ids to the pending jobs that depend on them.  Entries
    /// exist only while the key job is unfinished.
    dependants: Mutex<HashMap<Uuid, Vec<Uuid>>>,

    /// Wakes blocked dequeues whenever a job becomes ready.
    notify: Notify,
}

impl JobQueue {
    /// Open `dir` for exclusive use and recover persisted jobs.
    ///
    /// Jobs that are still `Pending` with all dependencies finished are
    /// re-queued; unfinished dependencies are re-entered into the
    /// reverse-dependency index.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        let queue = Self {
            db: JsonDatabase::new(dir.as_ref(), 0o600),
            pending: Mutex::new(HashMap::new()),
            dependants: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        };

        for name in queue.db.list()? {
            let id =
                Uuid::parse_str(&name).map_err(|_| QueueError::InvalidJobId(name.clone()))?;
            let job = queue.read_job(id)?;

            // Only jobs that never ran need rescheduling.
            if job.status != JobState::Pending {
                continue;
            }

            let mut finished = 0;
            for dep in &job.dependencies {
                if queue.read_job(*dep)?.status == JobState::Finished {
                    finished += 1;
                } else {
                    let mut dependants = queue.dependants.lock().unwrap();
                    dependants.entry(*dep).or_default().push(job.id);
                }
            }

            if finished == job.dependencies.len() {
                queue.push_pending(&job.job_type, job.id);
            }
        }

        Ok(queue)
    }

    /// Add a job of `job_type` to the queue and return its id.
    ///
    /// Every dependency must refer to an existing job.  The job document
    /// is written before any in-memory state changes; on write failure
    /// nothing is queued.
    pub fn enqueue<T: Serialize>(
        &self,
        job_type: &str,
        args: &T,
        dependencies: &[Uuid],
    ) -> Result<Uuid, QueueError> {
        let args = serde_json::to_value(args).map_err(QueueError::MarshalArgs)?;

        let job = Job {
            id: Uuid::new_v4(),
            job_type: job_type.to_owned(),
            args,
            dependencies: unique_sorted(dependencies),
            result: None,
            status: JobState::Pending,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        // Verify dependencies and count how many have already finished.
        let finished = self.count_finished(&job.dependencies)?;

        // Write before updating in-memory state, so that the latter cannot
        // become corrupt when writing fails.
        self.db.write(&job.id.to_string(), &job)?;

        // If all dependencies have finished, or there are none, queue the
        // job.  Otherwise record it under each dependency so the check is
        // redone when finish_job() is called for one of them.
        if finished == job.dependencies.len() {
            self.push_pending(&job.job_type, job.id);
        } else {
            let mut dependants = self.dependants.lock().unwrap();
            for dep in &job.dependencies {
                dependants.entry(*dep).or_default().push(job.id);
            }
        }

        info!("enqueued job {} of type '{}'", job.id, job.job_type);
        Ok(job.id)
    }

    /// Wait for the next ready job of any of `job_types`, mark it running,
    /// and return its id together with its deserialized arguments.
    ///
    /// Within a single type, jobs come out in the order they became
    /// ready.  Cancelling `cancel` aborts the wait without touching any
    /// job document.
    pub async fn dequeue<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        job_types: &[&str],
    ) -> Result<(Uuid, T), QueueError> {
        // Return early if the token is already cancelled.
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let id = loop {
            // Register for wakeups before checking the lists, so a push
            // happening between the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.pop_pending(job_types) {
                break id;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        };

        let mut job = self.read_job(id)?;

        // Deserialize before marking the job running; on failure the
        // document stays pending on disk.
        let args = serde_json::from_value(job.args.clone())
            .map_err(|source| QueueError::UnmarshalArgs { id, source })?;

        job.status = JobState::Running;
        job.started_at = Some(Utc::now());
        self.db.write(&id.to_string(), &job)?;

        info!("dequeued job {} of type '{}'", id, job.job_type);
        Ok((id, args))
    }

    /// Mark a running job as finished and attach its result.
    ///
    /// Dependants whose dependencies have now all finished become ready.
    pub fn finish_job<T: Serialize>(&self, id: Uuid, result: &T) -> Result<(), QueueError> {
        let mut job = self.read_job(id)?;

        if job.status != JobState::Running {
            return Err(QueueError::NotRunning);
        }

        job.status = JobState::Finished;
        job.finished_at = Some(Utc::now());
        job.result = Some(serde_json::to_value(result).map_err(QueueError::MarshalResult)?);

        // Write before waking dependants, because they re-read this
        // document to recount their finished dependencies.
        self.db.write(&id.to_string(), &job)?;

        let mut dependants = self.dependants.lock().unwrap();
        if let Some(waiters) = dependants.get(&id).cloned() {
            for waiter in waiters {
                let dependant = self.read_job(waiter)?;
                if self.count_finished(&dependant.dependencies)? == dependant.dependencies.len() {
                    self.push_pending(&dependant.job_type, dependant.id);
                }
            }
        }
        dependants.remove(&id);

        info!("finished job {}", id);
        Ok(())
    }

    /// Report a job's status, timestamps, and (if finished) its result.
    pub fn job_status(&self, id: Uuid) -> Result<JobStatus, QueueError> {
        let job = self.read_job(id)?;

        let result = match job.status {
            JobState::Finished => job.result,
            _ => None,
        };

        Ok(JobStatus {
            state: job.status,
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            result,
        })
    }

    fn read_job(&self, id: Uuid) -> Result<Job, QueueError> {
        self.db
            .read(&id.to_string())?
            .ok_or(QueueError::NotExist)
    }

    /// The number of jobs in `ids` that have finished.  Fails if any id
    /// does not refer to an existing job.
    fn count_finished(&self, ids: &[Uuid]) -> Result<usize, QueueError> {
        let mut n = 0;
        for id in ids {
            if self.read_job(*id)?.status == JobState::Finished {
                n += 1;
            }
        }
        Ok(n)
    }

    fn push_pending(&self, job_type: &str, id: Uuid) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.entry(job_type.to_owned()).or_default().push_back(id);
        }
        self.notify.notify_waiters();
    }

    fn pop_pending(&self, job_types: &[&str]) -> Option<Uuid> {
        let mut pending = self.pending.lock().unwrap();
        for job_type in job_types {
            if let Some(list) = pending.get_mut(*job_type) {
                if let Some(id) = list.pop_front() {
                    return Some(id);
                }
            }
        }
        None
    }
}

/// Sorts `ids` and removes duplicates.
fn unique_sorted(ids: &[Uuid]) -> Vec<Uuid> {
    let set: HashSet<Uuid> = ids.iter().copied().collect();
    let mut list: Vec<Uuid> = set.into_iter().collect();
    list.sort();
    list
}
