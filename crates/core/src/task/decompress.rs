//! Decompress job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Job, JobError, JobRecord, JobType, Progress, TaskError};
use crate::filesystem::FsDeps;

/// Props of a decompress job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompressProps {
    /// Virtual path of the archive.
    pub src: String,
    /// Virtual directory to extract into.
    pub dst: String,
}

/// Extracts a stored zip into a folder without overwriting anything.
pub struct DecompressJob {
    deps: FsDeps,
    record: JobRecord,
    props: DecompressProps,
}

impl DecompressJob {
    /// Records a new queued job.
    pub async fn create(deps: &FsDeps, user_id: i64, props: DecompressProps) -> Result<Self, TaskError> {
        let record =
            JobRecord::create(deps.repos.tasks.clone(), JobType::Decompress, user_id, &props).await?;
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
impl Job for DecompressJob {
    fn job_type(&self) -> JobType {
        JobType::Decompress
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

        self.set_progress(Progress::Decompressing.as_i64()).await;
        if let Err(e) = fs.decompress(&self.props.src, &self.props.dst, &cancel).await {
            self.set_error(JobError::from_fs("failed to decompress", &e)).await;
        }
    }
}
