//! Compress job: zip folders and files, then upload the archive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Job, JobError, JobRecord, JobType, Progress, TaskError};
use crate::filesystem::{ArchiveMode, FsDeps};

/// Props of a compress job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressProps {
    /// Folder IDs to include.
    pub dirs: Vec<i64>,
    /// File IDs to include.
    pub files: Vec<i64>,
    /// Virtual path of the resulting archive, including its name.
    pub dst: String,
}

/// Packs the selection into a deflated zip and stores it at `dst`.
pub struct CompressJob {
    deps: FsDeps,
    record: JobRecord,
    props: CompressProps,
}

impl CompressJob {
    /// Records a new queued job.
    pub async fn create(deps: &FsDeps, user_id: i64, props: CompressProps) -> Result<Self, TaskError> {
        let record = JobRecord::create(deps.repos.tasks.clone(), JobType::Compress, user_id, &props).await?;
        Ok(Self {
            deps: deps.clone(),
            record,
            props,
        })
    }

    /// Rebuilds a job from its row.
    pub fn from_record(deps: FsDeps, record: JobRecord) -> Result<Self, TaskError> {
        let props = record.decode_props()?;
        Ok(Self { deps, record, props })
    }
}

#[async_trait]
impl Job for CompressJob {
    fn job_type(&self) -> JobType {
        JobType::Compress
    }

    fn record(&self) -> &JobRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut JobRecord {
        &mut self.record
    }

    async fn run(&mut self, cancel: CancellationToken) {
        let mut fs = match self.deps.new_fs(self.creator()).await {
            Ok(fs) => fs,
            Err(e) => return self.set_error(JobError::from_fs("cannot open file system", &e)).await,
        };

        self.set_progress(Progress::Compressing.as_i64()).await;
        let archive = match fs
            .compress(&self.props.dirs, &self.props.files, ArchiveMode::Deflate, &cancel)
            .await
        {
            Ok(path) => path,
            Err(e) => return self.set_error(JobError::from_fs("failed to compress", &e)).await,
        };
        tracing::debug!(task_id = self.model().id, path = %archive.display(), "archive built, uploading");

        self.set_progress(Progress::Transferring.as_i64()).await;
        let uploaded = fs.upload_from_path(&archive, &self.props.dst, &cancel, false).await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            tracing::warn!(path = %archive.display(), error = %e, "failed to remove temporary archive");
        }
        if let Err(e) = uploaded {
            self.set_error(JobError::from_fs("failed to upload archive", &e)).await;
        }
    }
}
