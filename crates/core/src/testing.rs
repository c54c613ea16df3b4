//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;

use crate::driver::{
    ByteStream, ContentResponse, DeleteError, DriverError, Handler, HandlerFactory, ObjectInfo,
    ObjectMeta, PutOptions, SourceOptions, UploadCredential,
};
use crate::model::{
    Download, DownloadStatus, File, Folder, NewDownload, NewFile, NewFolder, NewTask, Policy,
    PolicyType, Task, TaskStatus, User,
};
use crate::repository::{
    DownloadRepository, FileRepository, FolderRepository, PolicyRepository, RepoError,
    Repositories, SettingRepository, TaskRepository, UserRepository,
};

const THUMB_SUFFIX: &str = "._thumb";

#[derive(Default)]
struct State {
    users: HashMap<i64, User>,
    policies: HashMap<i64, Policy>,
    files: BTreeMap<i64, File>,
    folders: BTreeMap<i64, Folder>,
    tasks: BTreeMap<i64, Task>,
    downloads: BTreeMap<i64, Download>,
    settings: HashMap<String, String>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn resolve(&self, mut user: User) -> User {
        if let Some(policy) = user
            .group
            .policy_list
            .first()
            .and_then(|id| self.policies.get(id))
        {
            user.policy = policy.clone();
        }
        user
    }
}

/// Every repository over one mutex-guarded state.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Store with user 1 in a group of `max_storage` bytes, local policy 1
    /// and root folder 1.
    pub fn with_user(max_storage: u64) -> Arc<Self> {
        let store = Self::default();
        {
            let mut state = store.lock();
            let user = fixtures::user(1, max_storage);
            state.policies.insert(1, user.policy.clone());
            state.users.insert(1, user);
            state.folders.insert(
                1,
                Folder {
                    id: 1,
                    name: "/".to_string(),
                    parent_id: None,
                    owner_id: 1,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
            state.next_id = 1;
        }
        Arc::new(store)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock")
    }

    /// Bundles this store as every repository.
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            users: self.clone(),
            policies: self.clone(),
            files: self.clone(),
            folders: self.clone(),
            tasks: self.clone(),
            downloads: self.clone(),
            settings: self.clone(),
        }
    }

    /// Current state of a user, with its active policy resolved.
    pub fn user(&self, id: i64) -> User {
        let state = self.lock();
        let user = state.users.get(&id).cloned().expect("user exists");
        state.resolve(user)
    }

    /// Overwrites a user's charged storage.
    pub fn set_storage(&self, id: i64, storage: u64) {
        if let Some(user) = self.lock().users.get_mut(&id) {
            user.storage = storage;
        }
    }

    /// Inserts or replaces a policy.
    pub fn add_policy(&self, policy: Policy) {
        self.lock().policies.insert(policy.id, policy);
    }

    /// Writes a setting row.
    pub fn put_setting(&self, name: &str, value: &str) {
        self.lock()
            .settings
            .insert(name.to_string(), value.to_string());
    }

    /// Root folder of a user.
    pub fn root(&self, uid: i64) -> Option<Folder> {
        self.lock()
            .folders
            .values()
            .find(|f| f.owner_id == uid && f.parent_id.is_none())
            .cloned()
    }

    /// Inserts a file row in the user's root, stored at `uploads/<uid>/<name>`.
    pub fn seed_file(&self, uid: i64, name: &str, size: u64) -> File {
        let root = self.root(uid).expect("root folder");
        let policy_id = self.user(uid).policy.id;
        let mut state = self.lock();
        let id = state.next_id();
        let file = File {
            id,
            name: name.to_string(),
            source_name: format!("uploads/{uid}/{name}"),
            user_id: uid,
            size,
            pic_info: String::new(),
            folder_id: root.id,
            policy_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.files.insert(id, file.clone());
        file
    }

    /// A file row.
    pub fn file(&self, id: i64) -> Option<File> {
        self.lock().files.get(&id).cloned()
    }

    /// All file rows.
    pub fn files(&self) -> Vec<File> {
        self.lock().files.values().cloned().collect()
    }

    /// Drops a file row.
    pub fn remove_file(&self, id: i64) {
        self.lock().files.remove(&id);
    }

    /// Sets a file's image dimensions.
    pub fn set_pic_info(&self, id: i64, pic_info: &str) {
        if let Some(file) = self.lock().files.get_mut(&id) {
            file.pic_info = pic_info.to_string();
        }
    }

    /// A task row.
    pub fn task(&self, id: i64) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    /// All task rows.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    /// A download row.
    pub fn download(&self, id: i64) -> Option<Download> {
        self.lock().downloads.get(&id).cloned()
    }

    /// All download rows.
    pub fn downloads(&self) -> Vec<Download> {
        self.lock().downloads.values().cloned().collect()
    }

    /// Inserts a `Ready` download of user 1 staged under `parent`.
    pub fn seed_download(&self, gid: &str, parent: &str, dst: &str) -> Download {
        let mut state = self.lock();
        let id = state.next_id();
        let mut download = fixtures::download(id, gid);
        download.parent = parent.to_string();
        download.dst = dst.to_string();
        state.downloads.insert(id, download.clone());
        download
    }

    /// Inserts a task row with an explicit status.
    pub fn seed_task(&self, task_type: i16, status: TaskStatus, props: &str) -> Task {
        let mut state = self.lock();
        let id = state.next_id();
        let task = Task {
            id,
            status,
            task_type,
            user_id: 1,
            progress: 0,
            error: None,
            props: props.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.tasks.insert(id, task.clone());
        task
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError> {
        let state = self.lock();
        let user = state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("user"))?;
        Ok(state.resolve(user))
    }

    async fn increase_storage(&self, user_id: i64, size: u64) -> Result<bool, RepoError> {
        let mut state = self.lock();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepoError::not_found("user"))?;
        match user.storage.checked_add(size) {
            Some(after) if after <= user.group.max_storage => {
                user.storage = after;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increase_storage_without_check(&self, user_id: i64, size: u64) -> Result<(), RepoError> {
        let mut state = self.lock();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepoError::not_found("user"))?;
        user.storage = user.storage.saturating_add(size);
        Ok(())
    }

    async fn deduct_storage(&self, user_id: i64, size: u64) -> Result<bool, RepoError> {
        let mut state = self.lock();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepoError::not_found("user"))?;
        let full = size <= user.storage;
        user.storage = user.storage.saturating_sub(size);
        Ok(full)
    }
}

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Policy, RepoError> {
        self.lock()
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("policy"))
    }
}

#[async_trait]
impl FileRepository for MemoryStore {
    async fn create(&self, file: NewFile) -> Result<File, RepoError> {
        let mut state = self.lock();
        if state.files.values().any(|f| {
            f.user_id == file.user_id && f.folder_id == file.folder_id && f.name == file.name
        }) {
            return Err(RepoError::conflict("files"));
        }
        let id = state.next_id();
        let row = File {
            id,
            name: file.name,
            source_name: file.source_name,
            user_id: file.user_id,
            size: file.size,
            pic_info: file.pic_info,
            folder_id: file.folder_id,
            policy_id: file.policy_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.files.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<File, RepoError> {
        self.lock()
            .files
            .get(&id)
            .filter(|f| f.user_id == user_id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("file"))
    }

    async fn find_by_ids(&self, ids: &[i64], user_id: i64) -> Result<Vec<File>, RepoError> {
        Ok(self
            .lock()
            .files
            .values()
            .filter(|f| f.user_id == user_id && ids.contains(&f.id))
            .cloned()
            .collect())
    }

    async fn find_by_folders(&self, folder_ids: &[i64], user_id: i64) -> Result<Vec<File>, RepoError> {
        Ok(self
            .lock()
            .files
            .values()
            .filter(|f| f.user_id == user_id && folder_ids.contains(&f.folder_id))
            .cloned()
            .collect())
    }

    async fn find_by_name(
        &self,
        folder_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<Option<File>, RepoError> {
        Ok(self
            .lock()
            .files
            .values()
            .find(|f| f.user_id == user_id && f.folder_id == folder_id && f.name == name)
            .cloned())
    }

    async fn find_by_sources(
        &self,
        policy_id: i64,
        source_names: &[String],
    ) -> Result<Vec<File>, RepoError> {
        Ok(self
            .lock()
            .files
            .values()
            .filter(|f| f.policy_id == policy_id && source_names.contains(&f.source_name))
            .cloned()
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), RepoError> {
        let mut state = self.lock();
        for id in ids {
            state.files.remove(id);
        }
        Ok(())
    }

    async fn update_size(&self, id: i64, size: u64) -> Result<(), RepoError> {
        let mut state = self.lock();
        let file = state.files.get_mut(&id).ok_or_else(|| RepoError::not_found("file"))?;
        file.size = size;
        Ok(())
    }

    async fn update_source_name(&self, id: i64, source_name: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        let file = state.files.get_mut(&id).ok_or_else(|| RepoError::not_found("file"))?;
        file.source_name = source_name.to_string();
        Ok(())
    }

    async fn update_pic_info(&self, id: i64, pic_info: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        let file = state.files.get_mut(&id).ok_or_else(|| RepoError::not_found("file"))?;
        file.pic_info = pic_info.to_string();
        Ok(())
    }

    async fn rename(&self, id: i64, user_id: i64, name: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        let folder_id = state
            .files
            .get(&id)
            .filter(|f| f.user_id == user_id)
            .map(|f| f.folder_id)
            .ok_or_else(|| RepoError::not_found("file"))?;
        if state
            .files
            .values()
            .any(|f| f.id != id && f.folder_id == folder_id && f.name == name)
        {
            return Err(RepoError::conflict("files"));
        }
        if let Some(file) = state.files.get_mut(&id) {
            file.name = name.to_string();
        }
        Ok(())
    }

    async fn move_to(&self, ids: &[i64], user_id: i64, folder_id: i64) -> Result<(), RepoError> {
        let mut state = self.lock();
        let moving: Vec<(i64, String)> = state
            .files
            .values()
            .filter(|f| f.user_id == user_id && ids.contains(&f.id))
            .map(|f| (f.id, f.name.clone()))
            .collect();
        for (id, name) in &moving {
            if state
                .files
                .values()
                .any(|f| f.id != *id && f.folder_id == folder_id && &f.name == name)
            {
                return Err(RepoError::conflict("files"));
            }
        }
        for (id, _) in moving {
            if let Some(file) = state.files.get_mut(&id) {
                file.folder_id = folder_id;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FolderRepository for MemoryStore {
    async fn create(&self, folder: NewFolder) -> Result<Folder, RepoError> {
        let mut state = self.lock();
        if state.folders.values().any(|f| {
            f.owner_id == folder.owner_id && f.parent_id == folder.parent_id && f.name == folder.name
        }) {
            return Err(RepoError::conflict("folders"));
        }
        let id = state.next_id();
        let row = Folder {
            id,
            name: folder.name,
            parent_id: folder.parent_id,
            owner_id: folder.owner_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.folders.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Folder, RepoError> {
        self.lock()
            .folders
            .get(&id)
            .filter(|f| f.owner_id == user_id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("folder"))
    }

    async fn find_by_ids(&self, ids: &[i64], user_id: i64) -> Result<Vec<Folder>, RepoError> {
        Ok(self
            .lock()
            .folders
            .values()
            .filter(|f| f.owner_id == user_id && ids.contains(&f.id))
            .cloned()
            .collect())
    }

    async fn find_root(&self, user_id: i64) -> Result<Option<Folder>, RepoError> {
        Ok(self.root(user_id))
    }

    async fn find_child(
        &self,
        parent_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<Option<Folder>, RepoError> {
        Ok(self
            .lock()
            .folders
            .values()
            .find(|f| f.owner_id == user_id && f.parent_id == Some(parent_id) && f.name == name)
            .cloned())
    }

    async fn list_children(&self, parent_ids: &[i64], user_id: i64) -> Result<Vec<Folder>, RepoError> {
        Ok(self
            .lock()
            .folders
            .values()
            .filter(|f| f.owner_id == user_id && f.parent_id.is_some_and(|p| parent_ids.contains(&p)))
            .cloned()
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), RepoError> {
        let mut state = self.lock();
        for id in ids {
            state.folders.remove(id);
        }
        Ok(())
    }

    async fn rename(&self, id: i64, user_id: i64, name: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        let parent_id = state
            .folders
            .get(&id)
            .filter(|f| f.owner_id == user_id)
            .map(|f| f.parent_id)
            .ok_or_else(|| RepoError::not_found("folder"))?;
        if state
            .folders
            .values()
            .any(|f| f.id != id && f.parent_id == parent_id && f.name == name)
        {
            return Err(RepoError::conflict("folders"));
        }
        if let Some(folder) = state.folders.get_mut(&id) {
            folder.name = name.to_string();
        }
        Ok(())
    }

    async fn move_to(&self, ids: &[i64], user_id: i64, parent_id: i64) -> Result<(), RepoError> {
        let mut state = self.lock();
        let moving: Vec<(i64, String)> = state
            .folders
            .values()
            .filter(|f| f.owner_id == user_id && ids.contains(&f.id))
            .map(|f| (f.id, f.name.clone()))
            .collect();
        for (id, name) in &moving {
            if state
                .folders
                .values()
                .any(|f| f.id != *id && f.parent_id == Some(parent_id) && &f.name == name)
            {
                return Err(RepoError::conflict("folders"));
            }
        }
        for (id, _) in moving {
            if let Some(folder) = state.folders.get_mut(&id) {
                folder.parent_id = Some(parent_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: NewTask) -> Result<Task, RepoError> {
        let mut state = self.lock();
        let id = state.next_id();
        let row = Task {
            id,
            status: TaskStatus::Queued,
            task_type: task.task_type,
            user_id: task.user_id,
            progress: 0,
            error: None,
            props: task.props,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.tasks.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: i64) -> Result<Task, RepoError> {
        self.task(id).ok_or_else(|| RepoError::not_found("task"))
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), RepoError> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or_else(|| RepoError::not_found("task"))?;
        task.status = status;
        Ok(())
    }

    async fn update_progress(&self, id: i64, progress: i64) -> Result<(), RepoError> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or_else(|| RepoError::not_found("task"))?;
        task.progress = progress;
        Ok(())
    }

    async fn update_error(&self, id: i64, error: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or_else(|| RepoError::not_found("task"))?;
        task.error = Some(error.to_string());
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, RepoError> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Task>, u64), RepoError> {
        let state = self.lock();
        let owned: Vec<Task> = state
            .tasks
            .values()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        let total = u64::try_from(owned.len()).unwrap_or(u64::MAX);
        let page = owned
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl DownloadRepository for MemoryStore {
    async fn create(&self, download: NewDownload) -> Result<Download, RepoError> {
        let mut state = self.lock();
        let id = state.next_id();
        let row = Download {
            id,
            status: DownloadStatus::Ready,
            download_type: download.download_type,
            source: download.source,
            total_size: 0,
            downloaded_size: 0,
            gid: download.gid,
            speed: 0,
            parent: download.parent,
            attrs: String::new(),
            error: String::new(),
            dst: download.dst,
            user_id: download.user_id,
            task_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.downloads.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Download, RepoError> {
        self.download(id)
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| RepoError::not_found("download"))
    }

    async fn save(&self, download: &Download) -> Result<(), RepoError> {
        let mut state = self.lock();
        if !state.downloads.contains_key(&download.id) {
            return Err(RepoError::not_found("download"));
        }
        state.downloads.insert(download.id, download.clone());
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<Download>, RepoError> {
        Ok(self
            .lock()
            .downloads
            .values()
            .filter(|d| statuses.contains(&d.status))
            .cloned()
            .collect())
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Download>, u64), RepoError> {
        let state = self.lock();
        let owned: Vec<Download> = state
            .downloads
            .values()
            .rev()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        let total = u64::try_from(owned.len()).unwrap_or(u64::MAX);
        let page = owned
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl SettingRepository for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<String>, RepoError> {
        Ok(self.lock().settings.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), RepoError> {
        self.put_setting(name, value);
        Ok(())
    }
}

/// Handler over an in-memory object map, with failure injection.
#[derive(Default)]
pub struct MemoryHandler {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
    etags: Mutex<HashMap<String, String>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    put_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryHandler {
    /// Empty handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().expect("memory handler lock")
    }

    /// Stores an object.
    pub fn insert(&self, path: &str, data: &[u8]) {
        self.objects().insert(path.to_string(), data.to_vec());
    }

    /// Reads an object.
    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects().get(path).cloned()
    }

    /// Makes every delete of `path` fail.
    pub fn fail_delete_of(&self, path: &str) {
        self.failing_deletes
            .lock()
            .expect("memory handler lock")
            .insert(path.to_string());
    }

    /// Makes every `put` fail.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Makes every `put` to `path` fail.
    pub fn fail_put_of(&self, path: &str) {
        self.failing_puts
            .lock()
            .expect("memory handler lock")
            .insert(path.to_string());
    }

    /// Holds every `put` open for `delay` so overlapping writes can be observed.
    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock().expect("memory handler lock") = Some(delay);
    }

    /// Entity tag reported by `meta` for `path`.
    pub fn set_etag(&self, path: &str, etag: &str) {
        self.etags
            .lock()
            .expect("memory handler lock")
            .insert(path.to_string(), etag.to_string());
    }

    /// Number of `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Most `put` calls that were running at the same time.
    pub fn peak_concurrent_puts(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn write(&self, mut stream: ByteStream, dst: &str, opts: PutOptions) -> Result<(), DriverError> {
        let delay = *self.put_delay.lock().expect("memory handler lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_puts.load(Ordering::SeqCst)
            || self
                .failing_puts
                .lock()
                .expect("memory handler lock")
                .contains(dst)
        {
            return Err(DriverError::io("injected put failure"));
        }
        if opts.disable_overwrite && self.objects().contains_key(dst) {
            return Err(DriverError::Exists(dst.to_string()));
        }
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        self.insert(dst, &data);
        Ok(())
    }
}

#[async_trait]
impl Handler for MemoryHandler {
    async fn put(
        &self,
        stream: ByteStream,
        dst: &str,
        _size: u64,
        opts: PutOptions,
    ) -> Result<(), DriverError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.write(stream, dst, opts).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, paths: &[String]) -> Result<(), DeleteError> {
        let failing = self
            .failing_deletes
            .lock()
            .expect("memory handler lock")
            .clone();
        let mut objects = self.objects();
        let mut failed = Vec::new();
        for path in paths {
            if failing.contains(path) {
                failed.push(path.clone());
                continue;
            }
            objects.remove(path);
            objects.remove(&format!("{path}{THUMB_SUFFIX}"));
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeleteError {
                failed,
                source: DriverError::io("injected delete failure"),
            })
        }
    }

    async fn get(&self, path: &str) -> Result<ByteStream, DriverError> {
        let data = self
            .object(path)
            .ok_or_else(|| DriverError::NotFound(path.to_string()))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn thumb(&self, path: &str) -> Result<ContentResponse, DriverError> {
        let stream = self.get(&format!("{path}{THUMB_SUFFIX}")).await?;
        Ok(ContentResponse::Stream(stream))
    }

    async fn source(&self, path: &str, opts: SourceOptions) -> Result<String, DriverError> {
        Ok(format!(
            "memory://{path}?ttl={}&download={}&speed={}",
            opts.ttl, opts.is_download, opts.speed
        ))
    }

    async fn token(
        &self,
        ttl: i64,
        callback_key: &str,
        save_path: &str,
    ) -> Result<UploadCredential, DriverError> {
        Ok(UploadCredential {
            token: ttl.to_string(),
            path: save_path.to_string(),
            callback: format!("http://localhost:5212/api/v3/callback/memory/{callback_key}"),
            ..UploadCredential::default()
        })
    }

    async fn list(&self, base: &str, recursive: bool) -> Result<Vec<ObjectInfo>, DriverError> {
        let trimmed = base.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |relative: String, size: u64, is_dir: bool| {
            if seen.insert(relative.clone()) {
                out.push(ObjectInfo {
                    name: relative.rsplit('/').next().unwrap_or(&relative).to_string(),
                    source: format!("{prefix}{relative}"),
                    relative_path: relative,
                    size,
                    is_dir,
                    last_modified: None,
                });
            }
        };

        for (key, data) in self.objects().iter() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let parts: Vec<&str> = rest.split('/').collect();
            if !recursive {
                if parts.len() > 1 {
                    push(parts[0].to_string(), 0, true);
                } else {
                    push(rest.to_string(), u64::try_from(data.len()).unwrap_or(0), false);
                }
                continue;
            }
            for depth in 1..parts.len() {
                push(parts[..depth].join("/"), 0, true);
            }
            push(rest.to_string(), u64::try_from(data.len()).unwrap_or(0), false);
        }
        Ok(out)
    }

    async fn meta(&self, path: &str) -> Result<ObjectMeta, DriverError> {
        let size = self
            .objects()
            .get(path)
            .map(|data| u64::try_from(data.len()).unwrap_or(0))
            .ok_or_else(|| DriverError::NotFound(path.to_string()))?;
        let etag = self
            .etags
            .lock()
            .expect("memory handler lock")
            .get(path)
            .cloned();
        Ok(ObjectMeta { size, etag })
    }
}

/// Hands out one shared [`MemoryHandler`] for every known policy type.
pub struct MemoryFactory {
    handler: Arc<MemoryHandler>,
}

impl MemoryFactory {
    /// Factory over `handler`.
    pub fn new(handler: Arc<MemoryHandler>) -> Self {
        Self { handler }
    }
}

impl HandlerFactory for MemoryFactory {
    fn build(&self, policy: &Policy) -> Result<Arc<dyn Handler>, DriverError> {
        if PolicyType::parse(&policy.policy_type).is_none() {
            return Err(DriverError::UnknownPolicyType(policy.policy_type.clone()));
        }
        Ok(self.handler.clone())
    }
}

/// Ready-made models and facades.
pub mod fixtures {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use chrono::Utc;
    use url::Url;

    use super::{MemoryFactory, MemoryHandler, MemoryStore};
    use crate::auth::HmacSigner;
    use crate::cache::{CacheStore, MemoStore};
    use crate::driver::DriverContext;
    use crate::filesystem::{FileSystem, FsDeps, ImageThumbnailer};
    use crate::model::{
        Download, DownloadStatus, DownloadType, File, Group, Policy, PolicyOptions, User, UserStatus,
    };
    use crate::setting::SettingStore;

    /// Local policy storing under `uploads/<uid>` with original names.
    pub fn local_policy(id: i64) -> Policy {
        Policy {
            id,
            name: format!("policy {id}"),
            policy_type: "local".to_string(),
            server: String::new(),
            bucket_name: String::new(),
            is_private: true,
            base_url: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            max_size: 0,
            auto_rename: false,
            dir_name_rule: "uploads/{uid}".to_string(),
            file_name_rule: "{originname}".to_string(),
            is_origin_link_enable: false,
            options: PolicyOptions::default(),
        }
    }

    /// Active user in a group of `max_storage` bytes using local policy 1.
    pub fn user(id: i64, max_storage: u64) -> User {
        User {
            id,
            email: format!("user{id}@example.com"),
            nick: format!("user{id}"),
            status: UserStatus::Active,
            group_id: 1,
            storage: 0,
            group: Group {
                id: 1,
                name: "default".to_string(),
                max_storage,
                policy_list: vec![1],
                speed_limit: 0,
            },
            policy: local_policy(1),
        }
    }

    /// File row of user 1 in root folder 1.
    pub fn file(id: i64, name: &str, size: u64) -> File {
        File {
            id,
            name: name.to_string(),
            source_name: format!("uploads/1/{name}"),
            user_id: 1,
            size,
            pic_info: String::new(),
            folder_id: 1,
            policy_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// `Ready` URL download of user 1 into the root folder.
    pub fn download(id: i64, gid: &str) -> Download {
        Download {
            id,
            status: DownloadStatus::Ready,
            download_type: DownloadType::Url,
            source: "http://example.com/a.iso".to_string(),
            total_size: 0,
            downloaded_size: 0,
            gid: gid.to_string(),
            speed: 0,
            parent: String::new(),
            attrs: String::new(),
            error: String::new(),
            dst: "/".to_string(),
            user_id: 1,
            task_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Driver context rooted at `root`.
    pub fn driver_context(root: &Path) -> DriverContext {
        DriverContext::new(
            root,
            Url::parse("http://localhost:5212").expect("site url"),
            HmacSigner::new("test-secret"),
            Arc::new(MemoStore::new()),
        )
    }

    /// Facade dependencies over the memory store and handler.
    pub fn deps(store: &Arc<MemoryStore>, handler: Arc<MemoryHandler>, temp_root: PathBuf) -> FsDeps {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoStore::new());
        FsDeps {
            repos: store.repositories(),
            cache: cache.clone(),
            handlers: Arc::new(MemoryFactory::new(handler)),
            settings: SettingStore::new(store.clone(), cache),
            thumbnailer: Arc::new(ImageThumbnailer),
            temp_root,
            thumb_suffix: super::THUMB_SUFFIX.to_string(),
        }
    }

    /// Facade for user 1.
    pub async fn fs(store: &Arc<MemoryStore>, handler: Arc<MemoryHandler>) -> FileSystem {
        deps(store, handler, std::env::temp_dir().join("stratus-tests"))
            .new_fs(1)
            .await
            .expect("fs")
    }
}
