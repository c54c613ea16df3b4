//! Background jobs and the worker pool that runs them.
//!
//! Every job is backed by a persisted [`Task`] row. Status, progress and
//! failures are written through to that row as they change, so a restarted
//! server can rebuild queued and processing jobs from the table alone with
//! [`job_from_model`].
//!
//! # Job types
//!
//! | Type | Tag | Props |
//! |------|-----|-------|
//! | Compress | 0 | `{dirs, files, dst}` |
//! | Decompress | 1 | `{src, dst}` |
//! | Transfer | 2 | `{src, parent, dst, trim_path}` |
//! | Import | 3 | `{policy_id, src, is_recursive, dst}` |

mod compress;
mod decompress;
mod import;
mod pool;
mod transfer;

pub use compress::{CompressJob, CompressProps};
pub use decompress::{DecompressJob, DecompressProps};
pub use import::{ImportJob, ImportProps};
pub use pool::WorkerPool;
pub use transfer::{TransferJob, TransferProps};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::filesystem::{ErrorKind, FsDeps, FsError};
use crate::model::{NewTask, Task, TaskStatus};
use crate::repository::{RepoError, TaskRepository};

/// Kind of job, persisted as the task's `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum JobType {
    /// Pack folders and files into a zip.
    Compress = 0,
    /// Extract a zip into a folder.
    Decompress = 1,
    /// Move staged local files into the user's storage.
    Transfer = 2,
    /// Register objects already present in a bucket or directory.
    Import = 3,
}

impl JobType {
    /// Maps a stored tag to a type.
    #[must_use]
    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Compress),
            1 => Some(Self::Decompress),
            2 => Some(Self::Transfer),
            3 => Some(Self::Import),
            _ => None,
        }
    }

    /// Stored tag.
    #[must_use]
    pub const fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Coarse progress stages. Transfer jobs report the current file index
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Progress {
    /// Not started.
    Pending = 0,
    /// Building an archive.
    Compressing = 1,
    /// Extracting an archive.
    Decompressing = 2,
    /// Fetching remote content.
    Downloading = 3,
    /// Uploading results.
    Transferring = 4,
    /// Listing a storage backend.
    Listing = 5,
    /// Inserting rows.
    Inserting = 6,
}

impl Progress {
    /// Stored value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Failure recorded on a task row, serialized as `{"msg", "error"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{msg}")]
pub struct JobError {
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    /// Underlying cause, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip)]
    canceled: bool,
}

impl JobError {
    /// Failure without an underlying cause.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ..Self::default()
        }
    }

    /// Failure caused by a file system error. A client cancellation marks
    /// the job as canceled rather than failed.
    #[must_use]
    pub fn from_fs(msg: impl Into<String>, err: &FsError) -> Self {
        Self {
            msg: msg.into(),
            error: err.to_string(),
            canceled: err.kind() == ErrorKind::ClientCanceled,
        }
    }

    /// Whether the job stopped because it was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }
}

/// Errors creating or rebuilding a job.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The stored type tag has no job.
    #[error("unknown task type: {0}")]
    UnknownType(i16),

    /// The stored props do not match the job type.
    #[error("invalid task props: {0}")]
    Props(#[from] serde_json::Error),

    /// The task row could not be written.
    #[error(transparent)]
    Persistence(#[from] RepoError),
}

/// Task row of one job plus its in-memory failure.
///
/// Writes are best effort: a persistence failure is logged and the job
/// keeps running.
pub struct JobRecord {
    task: Task,
    tasks: Arc<dyn TaskRepository>,
    error: Option<JobError>,
}

impl std::fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRecord")
            .field("task", &self.task)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl JobRecord {
    /// Inserts a queued task row for a new job.
    pub async fn create(
        tasks: Arc<dyn TaskRepository>,
        job_type: JobType,
        user_id: i64,
        props: &impl Serialize,
    ) -> Result<Self, TaskError> {
        let task = tasks
            .create(NewTask {
                task_type: job_type.as_i16(),
                user_id,
                props: serde_json::to_string(props)?,
            })
            .await?;
        Ok(Self::from_model(tasks, task))
    }

    /// Wraps an existing row.
    #[must_use]
    pub fn from_model(tasks: Arc<dyn TaskRepository>, task: Task) -> Self {
        Self {
            task,
            tasks,
            error: None,
        }
    }

    /// Decodes the row's props.
    pub fn decode_props<P: DeserializeOwned>(&self) -> Result<P, TaskError> {
        Ok(serde_json::from_str(&self.task.props)?)
    }

    /// Current row.
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    async fn set_status(&mut self, status: TaskStatus) {
        self.task.status = status;
        if let Err(e) = self.tasks.update_status(self.task.id, status).await {
            tracing::warn!(task_id = self.task.id, error = %e, "failed to persist task status");
        }
    }

    async fn set_progress(&mut self, progress: i64) {
        self.task.progress = progress;
        if let Err(e) = self.tasks.update_progress(self.task.id, progress).await {
            tracing::warn!(task_id = self.task.id, error = %e, "failed to persist task progress");
        }
    }

    async fn set_error(&mut self, err: JobError) {
        match serde_json::to_string(&err) {
            Ok(json) => {
                if let Err(e) = self.tasks.update_error(self.task.id, &json).await {
                    tracing::warn!(task_id = self.task.id, error = %e, "failed to persist task error");
                }
                self.task.error = Some(json);
            }
            Err(e) => tracing::warn!(task_id = self.task.id, error = %e, "failed to encode task error"),
        }
        self.error = Some(err);
    }
}

/// A unit of background work backed by a task row.
#[async_trait]
pub trait Job: Send + Sync {
    /// Type tag.
    fn job_type(&self) -> JobType;

    /// Backing record.
    fn record(&self) -> &JobRecord;

    /// Backing record, mutably.
    fn record_mut(&mut self) -> &mut JobRecord;

    /// Runs the job to completion. Failures are reported through
    /// [`Job::set_error`]; the pool derives the final status.
    async fn run(&mut self, cancel: CancellationToken);

    /// Owner.
    fn creator(&self) -> i64 {
        self.record().task.user_id
    }

    /// Serialized props.
    fn props(&self) -> &str {
        &self.record().task.props
    }

    /// Backing row.
    fn model(&self) -> &Task {
        self.record().task()
    }

    /// Updates and persists the status.
    async fn set_status(&mut self, status: TaskStatus) {
        self.record_mut().set_status(status).await;
    }

    /// Updates and persists the progress.
    async fn set_progress(&mut self, progress: i64) {
        self.record_mut().set_progress(progress).await;
    }

    /// Records a failure.
    async fn set_error(&mut self, err: JobError) {
        tracing::debug!(task_id = self.model().id, error = %err, cause = %err.error, "job failed");
        self.record_mut().set_error(err).await;
    }

    /// Failure recorded so far.
    fn error(&self) -> Option<&JobError> {
        self.record().error.as_ref()
    }
}

/// Rebuilds a job from its persisted row.
pub fn job_from_model(deps: &FsDeps, task: Task) -> Result<Box<dyn Job>, TaskError> {
    let job_type = JobType::from_i16(task.task_type).ok_or(TaskError::UnknownType(task.task_type))?;
    let record = JobRecord::from_model(deps.repos.tasks.clone(), task);
    Ok(match job_type {
        JobType::Compress => Box::new(CompressJob::from_record(deps.clone(), record)?),
        JobType::Decompress => Box::new(DecompressJob::from_record(deps.clone(), record)?),
        JobType::Transfer => Box::new(TransferJob::from_record(deps.clone(), record)?),
        JobType::Import => Box::new(ImportJob::from_record(deps.clone(), record)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};

    #[test]
    fn test_job_error_shape() {
        let err = JobError::from_fs("upload failed", &FsError::InsufficientCapacity);
        let json = serde_json::to_value(&err).expect("json");
        assert_eq!(json, serde_json::json!({"msg": "upload failed", "error": "insufficient capacity"}));
        assert!(!err.is_canceled());

        let bare = serde_json::to_value(JobError::new("fatal error")).expect("json");
        assert_eq!(bare, serde_json::json!({"msg": "fatal error"}));
    }

    #[test]
    fn test_client_cancel_marks_canceled() {
        assert!(JobError::from_fs("stopped", &FsError::ClientCanceled).is_canceled());
    }

    #[tokio::test]
    async fn test_job_from_model_rejects_unknown_type() {
        let store = MemoryStore::with_user(100);
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let task = store.seed_task(9, TaskStatus::Queued, "{}");

        assert!(matches!(job_from_model(&deps, task), Err(TaskError::UnknownType(9))));
    }

    #[tokio::test]
    async fn test_job_from_model_rejects_bad_props() {
        let store = MemoryStore::with_user(100);
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let task = store.seed_task(JobType::Decompress.as_i16(), TaskStatus::Queued, "[]");

        assert!(matches!(job_from_model(&deps, task), Err(TaskError::Props(_))));
    }

    #[tokio::test]
    async fn test_job_from_model_restores_props() {
        let store = MemoryStore::with_user(100);
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let task = store.seed_task(
            JobType::Import.as_i16(),
            TaskStatus::Processing,
            r#"{"policy_id":1,"src":"import","is_recursive":true,"dst":"/"}"#,
        );

        let job = job_from_model(&deps, task.clone()).expect("job");
        assert_eq!(job.job_type(), JobType::Import);
        assert_eq!(job.creator(), 1);
        assert_eq!(job.model().id, task.id);
    }

    #[tokio::test]
    async fn test_record_writes_through() {
        let store = MemoryStore::with_user(100);
        let mut record = JobRecord::create(store.clone(), JobType::Transfer, 1, &serde_json::json!({}))
            .await
            .expect("record");
        let id = record.task().id;

        record.set_progress(Progress::Listing.as_i64()).await;
        record.set_error(JobError::new("boom")).await;
        record.set_status(TaskStatus::Error).await;

        let row = store.task(id).expect("row");
        assert_eq!(row.progress, 5);
        assert_eq!(row.status, TaskStatus::Error);
        assert_eq!(row.error.as_deref(), Some(r#"{"msg":"boom"}"#));
    }
}
