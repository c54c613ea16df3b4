//! Zip archive creation and extraction.
//!
//! Zip encoding runs on the blocking pool. Compression streams entries to
//! the writer over a bounded channel so only one chunk per entry is held in
//! memory. Extraction stages the archive and its entries under the temp
//! root, then re-uploads the entries through regular upload facades.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{FileSystem, FsError, path};
use crate::model::{File, Folder};

/// Buffered operations between the walker and the zip writer.
const ARCHIVE_CHANNEL_CAPACITY: usize = 16;

/// How archive entries are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Entries are stored uncompressed.
    Store,
    /// Entries are deflated.
    Deflate,
}

impl ArchiveMode {
    fn method(self) -> CompressionMethod {
        match self {
            Self::Store => CompressionMethod::Stored,
            Self::Deflate => CompressionMethod::Deflated,
        }
    }

    fn temp_dir(self) -> &'static str {
        match self {
            Self::Store => "archive",
            Self::Deflate => "compress",
        }
    }
}

enum ArchiveOp {
    Dir(String),
    Begin(String),
    Data(Bytes),
}

enum WalkItem {
    Folder(Folder, String),
    File(File, String),
}

struct StagedEntry {
    virtual_path: String,
    local: Option<PathBuf>,
}

fn archive_name() -> String {
    format!(
        "archive_{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

fn entry_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn write_archive(
    target: &Path,
    mode: ArchiveMode,
    mut rx: mpsc::Receiver<ArchiveOp>,
) -> Result<(), FsError> {
    let file = std::fs::File::create(target)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(mode.method());

    while let Some(op) = rx.blocking_recv() {
        match op {
            ArchiveOp::Dir(name) => zip.add_directory(name, options)?,
            ArchiveOp::Begin(name) => zip.start_file(name, options)?,
            ArchiveOp::Data(chunk) => zip.write_all(&chunk)?,
        }
    }
    zip.finish()?;
    Ok(())
}

/// Validates every entry against `dst` before extracting anything.
fn extract_archive(archive: &Path, staging: &Path, dst: &str) -> Result<Vec<StagedEntry>, FsError> {
    let mut zip = ZipArchive::new(std::fs::File::open(archive)?)?;
    let root = path::clean(dst);

    let mut planned = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index_raw(index)?;
        let raw = entry.name().replace('\\', "/");
        let target = path::join(&[&root, &raw]);
        if target == root {
            continue;
        }
        if !path::is_within(&root, &target) {
            return Err(FsError::IllegalArchivePath(entry.name().to_string()));
        }
        planned.push((index, target, entry.is_dir()));
    }

    std::fs::create_dir_all(staging)?;
    let mut staged = Vec::with_capacity(planned.len());
    for (index, virtual_path, is_dir) in planned {
        if is_dir {
            staged.push(StagedEntry {
                virtual_path,
                local: None,
            });
            continue;
        }
        let mut entry = zip.by_index(index)?;
        let local = staging.join(index.to_string());
        let mut out = std::fs::File::create(&local)?;
        std::io::copy(&mut entry, &mut out)?;
        staged.push(StagedEntry {
            virtual_path,
            local: Some(local),
        });
    }
    Ok(staged)
}

impl FileSystem {
    /// Packs folders and files into a zip under the temp root and returns
    /// its local path. The caller owns the file.
    ///
    /// Each file is read through its own policy. Unreadable files are
    /// skipped. Cancellation is checked between entries and removes the
    /// partial archive.
    pub async fn compress(
        &mut self,
        dirs: &[i64],
        files: &[i64],
        mode: ArchiveMode,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FsError> {
        let repos = self.deps.repos.clone();
        let uid = self.user.id;
        let mut queue = Vec::new();
        if !dirs.is_empty() {
            for folder in repos.folders.find_by_ids(dirs, uid).await? {
                queue.push(WalkItem::Folder(folder, String::new()));
            }
        }
        if !files.is_empty() {
            for file in repos.files.find_by_ids(files, uid).await? {
                queue.push(WalkItem::File(file, String::new()));
            }
        }

        let target = self
            .deps
            .temp_root
            .join(mode.temp_dir())
            .join(format!("{}.zip", archive_name()));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (tx, rx) = mpsc::channel(ARCHIVE_CHANNEL_CAPACITY);
        let writer_target = target.clone();
        let writer = tokio::task::spawn_blocking(move || write_archive(&writer_target, mode, rx));

        // Depth-first; the queue is reversed so entries keep their listed order.
        queue.reverse();
        let walked = self.walk_into_archive(queue, &tx, cancel).await;
        drop(tx);
        let written = writer.await?;

        let outcome = match (walked, written) {
            (Ok(()), Ok(())) => Ok(target.clone()),
            (Err(FsError::ClientCanceled), _) => {
                tracing::debug!(path = %target.display(), "client canceled compression");
                Err(FsError::ClientCanceled)
            }
            (_, Err(e)) | (Err(e), Ok(())) => Err(e),
        };
        if outcome.is_err() {
            if let Err(e) = tokio::fs::remove_file(&target).await {
                tracing::warn!(path = %target.display(), error = %e, "failed to remove partial archive");
            }
        }
        outcome
    }

    async fn walk_into_archive(
        &mut self,
        mut stack: Vec<WalkItem>,
        tx: &mpsc::Sender<ArchiveOp>,
        cancel: &CancellationToken,
    ) -> Result<(), FsError> {
        let repos = self.deps.repos.clone();
        let uid = self.user.id;
        let send = |op| async move {
            tx.send(op)
                .await
                .map_err(|_| FsError::internal("archive writer stopped"))
        };

        while let Some(item) = stack.pop() {
            if cancel.is_cancelled() {
                return Err(FsError::ClientCanceled);
            }
            match item {
                WalkItem::Folder(folder, prefix) => {
                    let name = entry_name(&prefix, &folder.name);
                    send(ArchiveOp::Dir(format!("{name}/"))).await?;

                    let mut children: Vec<WalkItem> = repos
                        .folders
                        .list_children(&[folder.id], uid)
                        .await?
                        .into_iter()
                        .map(|f| WalkItem::Folder(f, name.clone()))
                        .collect();
                    children.extend(
                        repos
                            .files
                            .find_by_folders(&[folder.id], uid)
                            .await?
                            .into_iter()
                            .map(|f| WalkItem::File(f, name.clone())),
                    );
                    children.reverse();
                    stack.extend(children);
                }
                WalkItem::File(file, prefix) => {
                    if let Err(e) = self.switch_policy_by_id(file.policy_id).await {
                        tracing::warn!(file_id = file.id, error = %e, "cannot compress file");
                        continue;
                    }
                    let reader = match self.handler.get(&file.source_name).await {
                        Ok(reader) => reader,
                        Err(e) => {
                            tracing::warn!(file_id = file.id, error = %e, "cannot open file for compression");
                            continue;
                        }
                    };

                    send(ArchiveOp::Begin(entry_name(&prefix, &file.name))).await?;
                    let mut chunks = ReaderStream::new(reader);
                    while let Some(chunk) = chunks.next().await {
                        match chunk {
                            Ok(bytes) => send(ArchiveOp::Data(bytes)).await?,
                            Err(e) => {
                                tracing::warn!(file_id = file.id, error = %e, "archive entry truncated");
                                break;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Extracts the archive at virtual path `src` into `dst`.
    ///
    /// The whole archive is rejected when any entry would land outside
    /// `dst`. Entries are uploaded with overwrite disabled, at most
    /// `max_parallel_transfer` at a time; single failures are skipped.
    pub async fn decompress(
        &mut self,
        src: &str,
        dst: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FsError> {
        self.reset_file_if_not_exist(src).await?;
        let source = self.file_target[0].source_name.clone();

        let name = archive_name();
        let base = self.deps.temp_root.join("decompress");
        let archive = base.join(format!("{name}.zip"));
        let staging = base.join(name);

        let result = self
            .decompress_staged(&source, &archive, &staging, dst, cancel)
            .await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %archive.display(), error = %e, "failed to remove staged archive");
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }
        result
    }

    async fn decompress_staged(
        &mut self,
        source: &str,
        archive: &Path,
        staging: &Path,
        dst: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FsError> {
        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut reader = self.handler.get(source).await?;
        let mut local = tokio::fs::File::create(archive).await?;
        tokio::io::copy(&mut reader, &mut local).await?;
        drop(local);

        let (archive_path, staging_path, root) =
            (archive.to_path_buf(), staging.to_path_buf(), dst.to_string());
        let entries =
            tokio::task::spawn_blocking(move || extract_archive(&archive_path, &staging_path, &root))
                .await??;

        self.switch_policy(self.user.policy.clone())?;
        let mut uploads = Vec::new();
        for entry in entries {
            match entry.local {
                None => {
                    if let Err(e) = self.ensure_directory(&entry.virtual_path).await {
                        tracing::debug!(path = %entry.virtual_path, error = %e, "skipping archive directory");
                    }
                }
                Some(local) => uploads.push((entry.virtual_path, local)),
            }
        }

        let parallel = self
            .deps
            .settings
            .get_u64("max_parallel_transfer", 4)
            .await
            .max(1);
        let parallel = usize::try_from(parallel).unwrap_or(1);
        let deps = self.deps.clone();
        let user = self.user.clone();

        futures::stream::iter(uploads)
            .map(|(virtual_path, local)| {
                let deps = deps.clone();
                let user = user.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let uploaded = match FileSystem::new(deps, user) {
                        Ok(mut fs) => fs.upload_from_path(&local, &virtual_path, cancel, true).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = uploaded {
                        tracing::debug!(path = %virtual_path, error = %e, "skipping archive entry");
                    }
                }
            })
            .buffer_unordered(parallel)
            .collect::<Vec<()>>()
            .await;

        if cancel.is_cancelled() {
            return Err(FsError::ClientCanceled);
        }
        Ok(())
    }
}
