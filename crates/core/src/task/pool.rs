//! Bounded worker pool.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Job, JobError, TaskError, job_from_model};
use crate::filesystem::{FsDeps, FsError};
use crate::model::TaskStatus;
use crate::setting::SettingStore;

const DEFAULT_WORKERS: usize = 10;

/// A submitted job waiting for its slot.
struct Ticket {
    task_id: i64,
    start: oneshot::Sender<OwnedSemaphorePermit>,
}

/// Runs at most N jobs at once, admitting them in submission order.
///
/// Submissions go through one queue drained by a dispatcher task, which is
/// the only place permits are acquired.
#[derive(Clone)]
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Ticket>,
    workers: usize,
    running: Arc<DashMap<i64, CancellationToken>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("tracked", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Pool with `workers` slots, at least one. Must be called inside a
    /// Tokio runtime.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (queue, tickets) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(tickets, Arc::new(Semaphore::new(workers))));
        tracing::info!(workers, "task pool initialized");
        Self {
            queue,
            workers,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Pool sized by the `max_worker_num` setting.
    pub async fn from_settings(settings: &SettingStore) -> Self {
        let configured = settings.get_u64("max_worker_num", 10).await;
        Self::new(usize::try_from(configured).unwrap_or(DEFAULT_WORKERS))
    }

    /// Number of slots.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queues a job. The returned handle resolves once the job reached a
    /// terminal status.
    pub fn submit(&self, mut job: Box<dyn Job>) -> JoinHandle<()> {
        let task_id = job.model().id;
        let cancel = CancellationToken::new();
        self.running.insert(task_id, cancel.clone());

        let (start, started) = oneshot::channel();
        if self.queue.send(Ticket { task_id, start }).is_err() {
            tracing::warn!(task_id, "task pool dispatcher is gone");
        }

        let running = self.running.clone();
        tokio::spawn(async move {
            tracing::debug!(task_id, "waiting for a worker");
            match started.await {
                Ok(_permit) => execute(job.as_mut(), &cancel).await,
                Err(_) => tracing::warn!(task_id, "task pool closed before the job started"),
            }
            running.remove(&task_id);
        })
    }

    /// Fires the cancellation token of a queued or running job. Returns
    /// whether the job was known to this pool.
    pub fn cancel(&self, task_id: i64) -> bool {
        match self.running.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Resubmits every queued or processing task. Tasks that cannot be
    /// rebuilt are logged and skipped.
    pub async fn resume(&self, deps: &FsDeps) -> Result<Vec<JoinHandle<()>>, TaskError> {
        let tasks = deps
            .repos
            .tasks
            .list_by_status(&[TaskStatus::Queued, TaskStatus::Processing])
            .await?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(count = tasks.len(), "resuming unfinished tasks");

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task_id = task.id;
            match job_from_model(deps, task) {
                Ok(job) => handles.push(self.submit(job)),
                Err(e) => tracing::warn!(task_id, error = %e, "cannot resume task"),
            }
        }
        Ok(handles)
    }
}

/// Hands out permits strictly in queue order. Stops once every pool handle
/// is dropped.
async fn dispatch(mut tickets: mpsc::UnboundedReceiver<Ticket>, permits: Arc<Semaphore>) {
    while let Some(ticket) = tickets.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        if ticket.start.send(permit).is_err() {
            tracing::debug!(task_id = ticket.task_id, "job dropped before it started");
        }
    }
}

async fn execute(job: &mut dyn Job, cancel: &CancellationToken) {
    let task_id = job.model().id;
    if cancel.is_cancelled() {
        job.set_error(JobError::from_fs("canceled before start", &FsError::ClientCanceled))
            .await;
        job.set_status(TaskStatus::Canceled).await;
        return;
    }

    tracing::debug!(task_id, job_type = ?job.job_type(), "job started");
    job.set_status(TaskStatus::Processing).await;

    if AssertUnwindSafe(job.run(cancel.clone()))
        .catch_unwind()
        .await
        .is_err()
    {
        tracing::error!(task_id, "job panicked");
        job.set_error(JobError::new("fatal error")).await;
    }

    let status = match job.error() {
        None => TaskStatus::Complete,
        Some(err) if err.is_canceled() => TaskStatus::Canceled,
        Some(_) => TaskStatus::Error,
    };
    tracing::debug!(task_id, ?status, "job finished");
    job.set_status(status).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::task::{JobRecord, JobType, TransferProps};
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};

    #[derive(Clone, Copy)]
    enum Behavior {
        Sleep,
        Panic,
        Fail,
        WaitForCancel,
    }

    struct ScriptedJob {
        record: JobRecord,
        behavior: Behavior,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        started: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl Job for ScriptedJob {
        fn job_type(&self) -> JobType {
            JobType::Transfer
        }

        fn record(&self) -> &JobRecord {
            &self.record
        }

        fn record_mut(&mut self) -> &mut JobRecord {
            &mut self.record
        }

        async fn run(&mut self, cancel: CancellationToken) {
            let id = self.model().id;
            self.started.lock().expect("lock").push(id);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            match self.behavior {
                Behavior::Sleep => tokio::time::sleep(Duration::from_millis(50)).await,
                Behavior::Panic => panic!("scripted panic"),
                Behavior::Fail => self.set_error(JobError::new("scripted failure")).await,
                Behavior::WaitForCancel => {
                    cancel.cancelled().await;
                    self.set_error(JobError::from_fs("stopped", &FsError::ClientCanceled))
                        .await;
                }
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        started: Arc<Mutex<Vec<i64>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MemoryStore::with_user(100),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                started: Arc::new(Mutex::new(Vec::new())),
            }
        }

        async fn job(&self, behavior: Behavior) -> Box<dyn Job> {
            let record = JobRecord::create(self.store.clone(), JobType::Transfer, 1, &serde_json::json!({}))
                .await
                .expect("record");
            Box::new(ScriptedJob {
                record,
                behavior,
                active: self.active.clone(),
                peak: self.peak.clone(),
                started: self.started.clone(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_worker_count() {
        let harness = Harness::new();
        let pool = WorkerPool::new(2);

        let mut handles = Vec::new();
        for _ in 0..6 {
            handles.push(pool.submit(harness.job(Behavior::Sleep).await));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(harness.peak.load(Ordering::SeqCst), 2);
        assert!(
            harness
                .store
                .tasks()
                .iter()
                .all(|t| t.status == TaskStatus::Complete)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jobs_start_in_submission_order() {
        let harness = Harness::new();
        let pool = WorkerPool::new(1);

        let mut submitted = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let job = harness.job(Behavior::Sleep).await;
            submitted.push(job.model().id);
            handles.push(pool.submit(job));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(*harness.started.lock().expect("lock"), submitted);
        assert_eq!(harness.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let harness = Harness::new();
        let pool = WorkerPool::new(1);
        let job = harness.job(Behavior::Panic).await;
        let id = job.model().id;

        pool.submit(job).await.expect("join");

        let row = harness.store.task(id).expect("row");
        assert_eq!(row.status, TaskStatus::Error);
        assert_eq!(row.error.as_deref(), Some(r#"{"msg":"fatal error"}"#));
    }

    #[tokio::test]
    async fn test_reported_failure_becomes_error() {
        let harness = Harness::new();
        let pool = WorkerPool::new(1);
        let job = harness.job(Behavior::Fail).await;
        let id = job.model().id;

        pool.submit(job).await.expect("join");

        assert_eq!(harness.store.task(id).map(|t| t.status), Some(TaskStatus::Error));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let harness = Harness::new();
        let pool = WorkerPool::new(1);
        let job = harness.job(Behavior::WaitForCancel).await;
        let id = job.model().id;

        let handle = pool.submit(job);
        tokio::task::yield_now().await;
        assert!(pool.cancel(id));
        handle.await.expect("join");

        assert_eq!(harness.store.task(id).map(|t| t.status), Some(TaskStatus::Canceled));
        assert!(!pool.cancel(id));
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_runs() {
        let harness = Harness::new();
        let pool = WorkerPool::new(1);
        let blocker = harness.job(Behavior::WaitForCancel).await;
        let blocker_id = blocker.model().id;
        let queued = harness.job(Behavior::Sleep).await;
        let queued_id = queued.model().id;

        let first = pool.submit(blocker);
        let second = pool.submit(queued);
        tokio::task::yield_now().await;
        pool.cancel(queued_id);
        pool.cancel(blocker_id);
        first.await.expect("join");
        second.await.expect("join");

        assert!(harness.peak.load(Ordering::SeqCst) <= 1);
        assert_eq!(harness.store.task(queued_id).map(|t| t.status), Some(TaskStatus::Canceled));
    }

    #[tokio::test]
    async fn test_resume_resubmits_unfinished_tasks() {
        let store = MemoryStore::with_user(100);
        let staging = tempfile::tempdir().expect("tempdir");
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let props = serde_json::to_string(&TransferProps {
            src: Vec::new(),
            parent: staging.path().display().to_string(),
            dst: "/".to_string(),
            trim_path: false,
        })
        .expect("props");

        let queued = store.seed_task(JobType::Transfer.as_i16(), TaskStatus::Queued, &props);
        store.seed_task(JobType::Transfer.as_i16(), TaskStatus::Complete, &props);
        store.seed_task(42, TaskStatus::Processing, "{}");

        let pool = WorkerPool::new(2);
        let handles = pool.resume(&deps).await.expect("resume");
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(store.task(queued.id).map(|t| t.status), Some(TaskStatus::Complete));
        assert!(!staging.path().exists());
    }

    #[tokio::test]
    async fn test_from_settings_reads_worker_count() {
        let store = MemoryStore::with_user(100);
        store.put_setting("max_worker_num", "3");
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());

        assert_eq!(WorkerPool::from_settings(&deps.settings).await.workers(), 3);
    }
}
