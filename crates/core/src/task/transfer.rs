//! Transfer job: moves staged local files into the user's storage.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Job, JobError, JobRecord, JobType, TaskError};
use crate::filesystem::{FsDeps, FsError, path};

/// Props of a transfer job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProps {
    /// Local files to upload.
    pub src: Vec<String>,
    /// Local staging directory, removed once the job ends.
    pub parent: String,
    /// Virtual destination directory.
    pub dst: String,
    /// Keep the layout below `parent` instead of flattening into `dst`.
    pub trim_path: bool,
}

impl TransferProps {
    /// Virtual destination of one staged file.
    #[must_use]
    pub fn destination(&self, file: &str) -> String {
        let src = form_slash(file);
        if self.trim_path {
            let parent = form_slash(&self.parent);
            let relative = src.strip_prefix(parent.as_str()).unwrap_or(&src);
            path::join(&[&self.dst, relative])
        } else {
            path::join(&[&self.dst, &path::base(&src)])
        }
    }
}

fn form_slash(p: &str) -> String {
    p.replace('\\', "/")
}

/// Uploads staged files one by one with overwrite disabled. Progress is the
/// index of the file being uploaded. A failed file is recorded and the rest
/// still go through.
pub struct TransferJob {
    deps: FsDeps,
    record: JobRecord,
    props: TransferProps,
}

impl TransferJob {
    /// Records a new queued job.
    pub async fn create(deps: &FsDeps, user_id: i64, props: TransferProps) -> Result<Self, TaskError> {
        let record = JobRecord::create(deps.repos.tasks.clone(), JobType::Transfer, user_id, &props).await?;
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

    async fn transfer(&mut self, cancel: &CancellationToken) {
        let mut fs = match self.deps.new_fs(self.creator()).await {
            Ok(fs) => fs,
            Err(e) => return self.set_error(JobError::from_fs("cannot open file system", &e)).await,
        };

        let sources = self.props.src.clone();
        for (index, file) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return self
                    .set_error(JobError::from_fs("transfer canceled", &FsError::ClientCanceled))
                    .await;
            }
            self.set_progress(i64::try_from(index).unwrap_or(i64::MAX)).await;

            let dst = self.props.destination(file);
            if let Err(e) = fs.upload_from_path(Path::new(file), &dst, cancel, true).await {
                tracing::warn!(path = %file, dst = %dst, error = %e, "failed to transfer file");
                self.set_error(JobError::from_fs("failed to transfer file", &e)).await;
            }
        }
    }
}

#[async_trait]
impl Job for TransferJob {
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
        self.transfer(&cancel).await;

        if let Err(e) = tokio::fs::remove_dir_all(&self.props.parent).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.props.parent, error = %e, "failed to remove staging directory");
            }
        }
    }
}
