//! Import job: registers objects that already exist on a storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Job, JobError, JobRecord, JobType, Progress, TaskError};
use crate::filesystem::{FileHeader, FileSystem, FsDeps, FsError, Hook, HookPoint, UploadContext, path};
use crate::model::Folder;

/// Props of an import job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProps {
    /// Policy the objects live on.
    pub policy_id: i64,
    /// Physical base to list.
    pub src: String,
    /// Descend into sub-directories.
    pub is_recursive: bool,
    /// Virtual directory to import into.
    pub dst: String,
}

/// Lists a backend path and inserts rows for what it finds.
///
/// Directories are created first, then files are added with capacity
/// charged. A file that cannot be added is logged and skipped; running out
/// of capacity stops the job.
pub struct ImportJob {
    deps: FsDeps,
    record: JobRecord,
    props: ImportProps,
}

impl ImportJob {
    /// Records a new queued job.
    pub async fn create(deps: &FsDeps, user_id: i64, props: ImportProps) -> Result<Self, TaskError> {
        let record = JobRecord::create(deps.repos.tasks.clone(), JobType::Import, user_id, &props).await?;
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

    async fn open(&self) -> Result<FileSystem, FsError> {
        let policy = self.deps.repos.policies.find_by_id(self.props.policy_id).await?;
        let mut user = self.deps.repos.users.find_by_id(self.creator()).await?;
        user.policy = policy;
        let mut fs = FileSystem::new(self.deps.clone(), user)?;
        fs.use_hook(HookPoint::BeforeAddFile, Hook::ValidateFile);
        fs.use_hook(HookPoint::BeforeAddFile, Hook::ValidateCapacity);
        fs.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);
        Ok(fs)
    }

    async fn parent_of(
        fs: &FileSystem,
        cache: &mut HashMap<String, Folder>,
        virtual_path: &str,
    ) -> Result<Folder, FsError> {
        if let Some(folder) = cache.get(virtual_path) {
            return Ok(folder.clone());
        }
        let folder = match fs.is_path_exist(virtual_path).await? {
            Some(folder) => folder,
            None => fs.ensure_directory(virtual_path).await?,
        };
        cache.insert(virtual_path.to_string(), folder.clone());
        Ok(folder)
    }
}

#[async_trait]
impl Job for ImportJob {
    fn job_type(&self) -> JobType {
        JobType::Import
    }

    fn record(&self) -> &JobRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut JobRecord {
        &mut self.record
    }

    async fn run(&mut self, cancel: CancellationToken) {
        let mut fs = match self.open().await {
            Ok(fs) => fs,
            Err(e) => return self.set_error(JobError::from_fs("cannot open import policy", &e)).await,
        };

        self.set_progress(Progress::Listing.as_i64()).await;
        let objects = match fs.handler().list(&self.props.src, self.props.is_recursive).await {
            Ok(objects) => objects,
            Err(e) => {
                return self
                    .set_error(JobError::from_fs("failed to list objects", &e.into()))
                    .await;
            }
        };

        self.set_progress(Progress::Inserting.as_i64()).await;
        let mut folders: HashMap<String, Folder> = HashMap::with_capacity(objects.len());

        for object in objects.iter().filter(|o| o.is_dir) {
            let virtual_path = path::join(&[&self.props.dst, &object.relative_path]);
            match fs.ensure_directory(&virtual_path).await {
                Ok(folder) => {
                    folders.insert(virtual_path, folder);
                }
                Err(e) => tracing::warn!(path = %virtual_path, error = %e, "import cannot create directory"),
            }
        }

        for object in objects.iter().filter(|o| !o.is_dir) {
            if cancel.is_cancelled() {
                return self
                    .set_error(JobError::from_fs("import canceled", &FsError::ClientCanceled))
                    .await;
            }

            let virtual_path = path::dir(&path::join(&[&self.props.dst, &object.relative_path]));
            let parent = match Self::parent_of(&fs, &mut folders, &virtual_path).await {
                Ok(folder) => folder,
                Err(e) => {
                    tracing::warn!(path = %virtual_path, error = %e, "import cannot create directory");
                    continue;
                }
            };

            let header = FileHeader::new(object.name.clone(), object.size, virtual_path);
            let mut ctx = UploadContext::new(header, &cancel).with_save_path(object.source.clone());
            match fs.add_file(&mut ctx, &parent).await {
                Ok(_) => {}
                Err(FsError::InsufficientCapacity) => {
                    return self
                        .set_error(JobError::from_fs("insufficient capacity", &FsError::InsufficientCapacity))
                        .await;
                }
                Err(e) => {
                    tracing::warn!(path = %object.relative_path, error = %e, "import cannot insert file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};

    async fn import(
        store: &std::sync::Arc<MemoryStore>,
        handler: std::sync::Arc<MemoryHandler>,
        recursive: bool,
    ) -> ImportJob {
        let deps = fixtures::deps(store, handler, std::env::temp_dir());
        let mut job = ImportJob::create(
            &deps,
            1,
            ImportProps {
                policy_id: 1,
                src: "import".to_string(),
                is_recursive: recursive,
                dst: "/imported".to_string(),
            },
        )
        .await
        .expect("job");
        job.run(CancellationToken::new()).await;
        job
    }

    #[tokio::test]
    async fn test_recursive_import_keeps_structure() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.insert("import/top.txt", b"12345");
        handler.insert("import/sub/deep.txt", b"123");

        let job = import(&store, handler, true).await;

        assert!(job.error().is_none());
        assert_eq!(job.model().progress, Progress::Inserting.as_i64());
        let files = store.files();
        let deep = files.iter().find(|f| f.name == "deep.txt").expect("deep imported");
        assert_eq!(deep.source_name, "import/sub/deep.txt");
        assert!(files.iter().any(|f| f.name == "top.txt"));
        assert_eq!(store.user(1).storage, 8);
    }

    #[tokio::test]
    async fn test_flat_import_skips_nested_files() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.insert("import/top.txt", b"12345");
        handler.insert("import/sub/deep.txt", b"123");

        import(&store, handler, false).await;

        let names: Vec<String> = store.files().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["top.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_capacity_stops_import() {
        let store = MemoryStore::with_user(4);
        let handler = MemoryHandler::new();
        handler.insert("import/big.bin", b"12345");

        let job = import(&store, handler, true).await;

        let err = job.error().expect("failed");
        assert_eq!(err.msg, "insufficient capacity");
        assert!(store.files().is_empty());
        assert_eq!(store.user(1).storage, 0);
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.insert("import/top.txt", b"12345");

        import(&store, handler.clone(), false).await;
        let job = import(&store, handler, false).await;

        assert!(job.error().is_none());
        assert_eq!(store.files().len(), 1);
        assert_eq!(store.user(1).storage, 5);
    }

    #[tokio::test]
    async fn test_unknown_policy_fails() {
        let store = MemoryStore::with_user(100);
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let job = ImportJob::create(
            &deps,
            1,
            ImportProps {
                policy_id: 99,
                src: String::new(),
                is_recursive: false,
                dst: "/".to_string(),
            },
        )
        .await
        .expect("job");
        let id = job.model().id;
        crate::task::WorkerPool::new(1).submit(Box::new(job)).await.expect("join");

        assert_eq!(store.task(id).map(|t| t.status), Some(TaskStatus::Error));
    }
}
