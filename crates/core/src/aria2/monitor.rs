//! Per-download status monitor.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Aria2Error, Aria2Service, StatusEvent, StatusInfo};
use crate::filesystem::{FileHeader, Hook, HookPoint, UploadContext};
use crate::model::{Download, DownloadStatus};
use crate::task::{Job, TransferJob, TransferProps};

/// Consecutive failed status queries tolerated before giving up.
pub const MAX_RETRY: u32 = 10;

/// Mirrors one daemon job into its download row until the job reaches a
/// final state.
pub struct Monitor {
    service: Aria2Service,
    download: Download,
    interval: Duration,
    retried: u32,
}

impl Monitor {
    /// Monitor for `download`, polling every `interval`.
    #[must_use]
    pub fn new(service: Aria2Service, download: Download, interval: Duration) -> Self {
        Self {
            service,
            download,
            interval,
            retried: 0,
        }
    }

    /// Current view of the row.
    #[must_use]
    pub fn download(&self) -> &Download {
        &self.download
    }

    /// Subscribes to push events and runs until a final state.
    pub fn spawn(self) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(8);
        self.service.notifier().subscribe(&self.download.gid, tx);
        tokio::spawn(self.run(rx))
    }

    async fn run(mut self, mut events: mpsc::Receiver<StatusEvent>) {
        let mut ticker = tokio::time::interval(self.interval);
        // A replaced or dropped subscription closes the channel; polling
        // continues on the ticker alone.
        let mut open = true;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = events.recv(), if open => {
                    match event {
                        Some(event) => {
                            tracing::debug!(gid = %event.gid, status = ?event.status, "status event received");
                        }
                        None => {
                            tracing::debug!(gid = %self.download.gid, "status channel closed, polling only");
                            open = false;
                            continue;
                        }
                    }
                }
            }
            if self.update().await {
                break;
            }
        }
        self.service.notifier().unsubscribe(&self.download.gid);
        tracing::debug!(id = self.download.id, gid = %self.download.gid, "download monitor stopped");
    }

    /// Queries the daemon once and reacts. Returns true when monitoring
    /// should stop.
    pub async fn update(&mut self) -> bool {
        let status = match self.service.client().status(&self.download).await {
            Ok(status) => status,
            Err(e) => {
                self.retried += 1;
                tracing::warn!(
                    gid = %self.download.gid,
                    attempt = self.retried,
                    error = %e,
                    "cannot query download status"
                );
                if self.retried > MAX_RETRY {
                    self.set_error(&e.to_string()).await;
                    self.remove_temp_folder().await;
                    return true;
                }
                return false;
            }
        };
        self.retried = 0;

        if let Some(next) = status.followed_by.first() {
            let previous = std::mem::replace(&mut self.download.gid, next.clone());
            self.save().await;
            self.service.notifier().resubscribe(&previous, next);
            tracing::info!(from = %previous, to = %next, "download followed by a new job");
            return false;
        }

        if let Err(e) = self.update_task_info(&status).await {
            tracing::warn!(gid = %self.download.gid, error = %e, "download rejected after size update");
            self.set_error(&e.to_string()).await;
            self.remove_temp_folder().await;
            return true;
        }

        match status.status.as_str() {
            "complete" => self.complete(&status).await,
            "error" => {
                self.set_error(&status.error_message).await;
                self.remove_temp_folder().await;
                true
            }
            "active" | "waiting" | "paused" => false,
            "removed" => {
                self.download.status = DownloadStatus::Canceled;
                self.save().await;
                self.remove_temp_folder().await;
                true
            }
            other => {
                tracing::warn!(gid = %self.download.gid, status = other, "unknown download status");
                true
            }
        }
    }

    async fn update_task_info(&mut self, status: &StatusInfo) -> Result<(), Aria2Error> {
        let previous_total = self.download.total_size;
        if !status.gid.is_empty() {
            self.download.gid.clone_from(&status.gid);
        }
        self.download.status = DownloadStatus::from_aria2(&status.status);
        self.download.total_size = status.total_length.parse().unwrap_or(0);
        self.download.downloaded_size = status.completed_length.parse().unwrap_or(0);
        self.download.speed = status.download_speed.parse().unwrap_or(0);
        self.download.parent.clone_from(&status.dir);
        self.download.attrs = serde_json::to_string(status).unwrap_or_default();
        self.service.deps().repos.downloads.save(&self.download).await?;

        if previous_total != self.download.total_size {
            if let Err(e) = self.validate(status).await {
                if let Err(cancel) = self.service.client().cancel(&self.download).await {
                    tracing::warn!(gid = %self.download.gid, error = %cancel, "cannot cancel rejected download");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Checks the announced size against the owner's remaining capacity and
    /// each selected file against the policy.
    async fn validate(&self, status: &StatusInfo) -> Result<(), Aria2Error> {
        let mut fs = self.service.deps().new_fs(self.download.user_id).await?;
        let cancel = CancellationToken::new();

        fs.use_hook(HookPoint::BeforeUpload, Hook::ValidateCapacityWithoutIncrease);
        let mut ctx = UploadContext::new(
            FileHeader::new(String::new(), self.download.total_size, self.download.dst.clone()),
            &cancel,
        );
        fs.trigger(HookPoint::BeforeUpload, &mut ctx).await?;

        fs.clean_hooks(HookPoint::BeforeUpload);
        fs.use_hook(HookPoint::BeforeUpload, Hook::ValidateFile);
        for file in status.files.iter().filter(|f| f.is_selected()) {
            let local = file.path.replace('\\', "/");
            let name = Path::new(&local)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut ctx = UploadContext::new(
                FileHeader::new(name, file.size(), self.download.dst.clone()),
                &cancel,
            );
            fs.trigger(HookPoint::BeforeUpload, &mut ctx).await?;
        }
        Ok(())
    }

    async fn complete(&mut self, status: &StatusInfo) -> bool {
        let props = TransferProps {
            src: status.selected_paths(),
            parent: self.download.parent.clone(),
            dst: self.download.dst.clone(),
            trim_path: true,
        };
        let job = match TransferJob::create(self.service.deps(), self.download.user_id, props).await {
            Ok(job) => job,
            Err(e) => {
                self.set_error(&e.to_string()).await;
                return true;
            }
        };

        self.download.task_id = Some(job.model().id);
        self.service.pool().submit(Box::new(job));
        self.save().await;
        tracing::info!(gid = %self.download.gid, task_id = ?self.download.task_id, "download complete, transfer queued");
        true
    }

    async fn set_error(&mut self, message: &str) {
        self.download.status = DownloadStatus::Error;
        self.download.error = message.to_string();
        self.save().await;
    }

    async fn save(&self) {
        if let Err(e) = self.service.deps().repos.downloads.save(&self.download).await {
            tracing::warn!(id = self.download.id, error = %e, "failed to save download");
        }
    }

    async fn remove_temp_folder(&self) {
        if self.download.parent.is_empty() {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.download.parent).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.download.parent, error = %e, "failed to remove download folder");
            }
        }
    }
}
