//! Persistence traits.
//!
//! These traits are implemented by the db crate to provide actual database
//! operations, and by in-memory stores in tests. Every method is a single
//! round trip; multi-step logic lives in the callers.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Download, DownloadStatus, File, Folder, NewDownload, NewFile, NewFolder, NewTask, Policy,
    Task, TaskStatus, User,
};

/// Repository errors.
#[derive(Debug, Clone, Error)]
pub enum RepoError {
    /// Row not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Unique constraint violated.
    #[error("record conflict: {0}")]
    Conflict(String),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl RepoError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create a database error.
    #[must_use]
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}

/// Users and their capacity counters.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Loads a user with its group and active policy.
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError>;

    /// Adds `size` to the user's storage iff the result stays within the
    /// group's `max_storage`. Returns whether the update was applied.
    async fn increase_storage(&self, user_id: i64, size: u64) -> Result<bool, RepoError>;

    /// Adds `size` without any capacity check.
    async fn increase_storage_without_check(&self, user_id: i64, size: u64)
    -> Result<(), RepoError>;

    /// Subtracts `size`, flooring at zero. Returns whether the full amount
    /// was available.
    async fn deduct_storage(&self, user_id: i64, size: u64) -> Result<bool, RepoError>;
}

/// Storage policies.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Loads a policy.
    async fn find_by_id(&self, id: i64) -> Result<Policy, RepoError>;
}

/// File rows.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Inserts a row. A name collision in the folder is a `Conflict`.
    async fn create(&self, file: NewFile) -> Result<File, RepoError>;

    /// Loads one of the user's files.
    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<File, RepoError>;

    /// Loads the user's files among `ids`.
    async fn find_by_ids(&self, ids: &[i64], user_id: i64) -> Result<Vec<File>, RepoError>;

    /// Loads the user's files directly inside any of `folder_ids`.
    async fn find_by_folders(&self, folder_ids: &[i64], user_id: i64)
    -> Result<Vec<File>, RepoError>;

    /// Looks up a file by name inside a folder.
    async fn find_by_name(
        &self,
        folder_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<Option<File>, RepoError>;

    /// Loads every row pointing at any of `source_names` under `policy_id`.
    async fn find_by_sources(
        &self,
        policy_id: i64,
        source_names: &[String],
    ) -> Result<Vec<File>, RepoError>;

    /// Deletes rows by ID.
    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), RepoError>;

    /// Sets the size.
    async fn update_size(&self, id: i64, size: u64) -> Result<(), RepoError>;

    /// Sets the physical key.
    async fn update_source_name(&self, id: i64, source_name: &str) -> Result<(), RepoError>;

    /// Sets the image dimensions.
    async fn update_pic_info(&self, id: i64, pic_info: &str) -> Result<(), RepoError>;

    /// Renames a file. A collision is a `Conflict`.
    async fn rename(&self, id: i64, user_id: i64, name: &str) -> Result<(), RepoError>;

    /// Moves files into another folder. A collision is a `Conflict`.
    async fn move_to(&self, ids: &[i64], user_id: i64, folder_id: i64) -> Result<(), RepoError>;
}

/// Folder rows.
#[async_trait]
pub trait FolderRepository: Send + Sync {
    /// Inserts a row. A name collision under the parent is a `Conflict`.
    async fn create(&self, folder: NewFolder) -> Result<Folder, RepoError>;

    /// Loads one of the user's folders.
    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Folder, RepoError>;

    /// Loads the user's folders among `ids`.
    async fn find_by_ids(&self, ids: &[i64], user_id: i64) -> Result<Vec<Folder>, RepoError>;

    /// Loads the user's root folder.
    async fn find_root(&self, user_id: i64) -> Result<Option<Folder>, RepoError>;

    /// Looks up a child folder by name.
    async fn find_child(
        &self,
        parent_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<Option<Folder>, RepoError>;

    /// Lists direct children of any of `parent_ids`.
    async fn list_children(&self, parent_ids: &[i64], user_id: i64)
    -> Result<Vec<Folder>, RepoError>;

    /// Deletes rows by ID.
    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), RepoError>;

    /// Renames a folder. A collision is a `Conflict`.
    async fn rename(&self, id: i64, user_id: i64, name: &str) -> Result<(), RepoError>;

    /// Moves folders under another parent. A collision is a `Conflict`.
    async fn move_to(&self, ids: &[i64], user_id: i64, parent_id: i64) -> Result<(), RepoError>;
}

/// Background task rows.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a row in `Queued`.
    async fn create(&self, task: NewTask) -> Result<Task, RepoError>;

    /// Loads a task.
    async fn find_by_id(&self, id: i64) -> Result<Task, RepoError>;

    /// Sets the status.
    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), RepoError>;

    /// Sets the progress.
    async fn update_progress(&self, id: i64, progress: i64) -> Result<(), RepoError>;

    /// Sets the serialized error.
    async fn update_error(&self, id: i64, error: &str) -> Result<(), RepoError>;

    /// Loads all tasks in any of the given states.
    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, RepoError>;

    /// Pages through a user's tasks, newest first. Returns the page and the total.
    async fn list_by_user(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Task>, u64), RepoError>;
}

/// Offline download rows.
#[async_trait]
pub trait DownloadRepository: Send + Sync {
    /// Inserts a row in `Ready`.
    async fn create(&self, download: NewDownload) -> Result<Download, RepoError>;

    /// Loads one of the user's downloads.
    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Download, RepoError>;

    /// Writes every mutable column back.
    async fn save(&self, download: &Download) -> Result<(), RepoError>;

    /// Loads all downloads in any of the given states.
    async fn list_by_status(&self, statuses: &[DownloadStatus])
    -> Result<Vec<Download>, RepoError>;

    /// Pages through a user's downloads, newest first.
    async fn list_by_user(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Download>, u64), RepoError>;
}

/// Persisted name/value settings.
#[async_trait]
pub trait SettingRepository: Send + Sync {
    /// Reads a setting.
    async fn get(&self, name: &str) -> Result<Option<String>, RepoError>;

    /// Inserts or replaces a setting.
    async fn set(&self, name: &str, value: &str) -> Result<(), RepoError>;
}

/// All repositories, shared behind `Arc`s.
#[derive(Clone)]
pub struct Repositories {
    /// Users.
    pub users: Arc<dyn UserRepository>,
    /// Policies.
    pub policies: Arc<dyn PolicyRepository>,
    /// Files.
    pub files: Arc<dyn FileRepository>,
    /// Folders.
    pub folders: Arc<dyn FolderRepository>,
    /// Tasks.
    pub tasks: Arc<dyn TaskRepository>,
    /// Downloads.
    pub downloads: Arc<dyn DownloadRepository>,
    /// Settings.
    pub settings: Arc<dyn SettingRepository>,
}
