//! Directory and object management.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::validator::is_legal_name;
use super::{FileSystem, FsError, path};
use crate::driver::{ByteStream, SourceOptions};
use crate::model::{File, Folder, NewFile, NewFolder};
use crate::repository::RepoError;

/// Kind of a listed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// A folder.
    Dir,
    /// A file.
    File,
}

/// A listed file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Object {
    /// Row ID; 0 for physical directories.
    pub id: i64,
    /// Name.
    pub name: String,
    /// Virtual path of the parent.
    pub path: String,
    /// Image dimensions, `"w,h"` or empty.
    pub pic: String,
    /// Size in bytes; 0 for folders.
    pub size: u64,
    /// File or folder.
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    /// Creation time.
    pub date: DateTime<Utc>,
}

impl Object {
    fn folder(folder: &Folder, parent: &str) -> Self {
        Self {
            id: folder.id,
            name: folder.name.clone(),
            path: parent.to_string(),
            pic: String::new(),
            size: 0,
            object_type: ObjectType::Dir,
            date: folder.created_at,
        }
    }

    fn file(file: &File, parent: &str) -> Self {
        Self {
            id: file.id,
            name: file.name.clone(),
            path: parent.to_string(),
            pic: file.pic_info.clone(),
            size: file.size,
            object_type: ObjectType::File,
            date: file.created_at,
        }
    }
}

fn rename_error(err: RepoError) -> FsError {
    match err {
        RepoError::Conflict(_) => FsError::FileExisted,
        RepoError::NotFound(_) => FsError::PathNotExist,
        other => other.into(),
    }
}

impl FileSystem {
    async fn resolve_root(&self) -> Result<Option<Folder>, FsError> {
        if let Some(root) = &self.root {
            return Ok(Some(root.clone()));
        }
        Ok(self.deps.repos.folders.find_root(self.user.id).await?)
    }

    /// Resolves a virtual directory path, starting from `self.root` when set.
    pub async fn is_path_exist(&self, path: &str) -> Result<Option<Folder>, FsError> {
        let parts = path::split(path);
        if parts.is_empty() {
            return Ok(None);
        }
        let Some(mut current) = self.resolve_root().await? else {
            return Ok(None);
        };

        let folders = &self.deps.repos.folders;
        for name in &parts[1..] {
            match folders.find_child(current.id, self.user.id, name).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Resolves a virtual file path.
    pub async fn is_file_exist(&self, full_path: &str) -> Result<Option<File>, FsError> {
        let Some(parent) = self.is_path_exist(&path::dir(full_path)).await? else {
            return Ok(None);
        };
        self.is_child_file_exist(&parent, &path::base(full_path))
            .await
    }

    /// Looks up a file by name inside `folder`.
    pub async fn is_child_file_exist(
        &self,
        folder: &Folder,
        name: &str,
    ) -> Result<Option<File>, FsError> {
        Ok(self
            .deps
            .repos
            .files
            .find_by_name(folder.id, self.user.id, name)
            .await?)
    }

    /// Creates a folder and any missing ancestors.
    ///
    /// Ancestors are created conflict-tolerantly; the final element must not
    /// exist as a folder or a file.
    pub async fn create_directory(&self, full_path: &str) -> Result<Folder, FsError> {
        if full_path.is_empty() || full_path == "/" || full_path == "." {
            return Err(FsError::RootProtected);
        }
        let cleaned = path::clean(full_path);
        if cleaned == "/" {
            return Err(FsError::RootProtected);
        }

        let name = path::base(&cleaned).trim_end_matches(' ').to_string();
        if !is_legal_name(&name) {
            return Err(FsError::IllegalObjectName);
        }

        let parent = self.ensure_directory(&path::dir(&cleaned)).await?;
        if self.is_child_file_exist(&parent, &name).await?.is_some() {
            return Err(FsError::FileExisted);
        }

        let new_folder = NewFolder {
            name,
            parent_id: Some(parent.id),
            owner_id: self.user.id,
        };
        match self.deps.repos.folders.create(new_folder).await {
            Ok(folder) => Ok(folder),
            Err(RepoError::Conflict(_)) => Err(FsError::FolderExisted),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the folder at `path`, creating every missing element.
    /// Existing folders are never an error.
    pub async fn ensure_directory(&self, dir_path: &str) -> Result<Folder, FsError> {
        let parts = path::split(dir_path);
        if parts.is_empty() {
            return Err(FsError::PathNotExist);
        }
        let mut current = self.resolve_root().await?.ok_or(FsError::PathNotExist)?;

        let folders = &self.deps.repos.folders;
        for name in &parts[1..] {
            if let Some(child) = folders.find_child(current.id, self.user.id, name).await? {
                current = child;
                continue;
            }
            if !is_legal_name(name) {
                return Err(FsError::IllegalObjectName);
            }
            let new_folder = NewFolder {
                name: name.clone(),
                parent_id: Some(current.id),
                owner_id: self.user.id,
            };
            current = match folders.create(new_folder).await {
                Ok(folder) => folder,
                // Lost a race against a concurrent creator.
                Err(RepoError::Conflict(_)) => folders
                    .find_child(current.id, self.user.id, name)
                    .await?
                    .ok_or(FsError::FolderExisted)?,
                Err(e) => return Err(e.into()),
            };
        }
        Ok(current)
    }

    /// Lists the folders and files directly inside `path`.
    pub async fn list(&mut self, dir_path: &str) -> Result<Vec<Object>, FsError> {
        let folder = self
            .is_path_exist(dir_path)
            .await?
            .ok_or(FsError::PathNotExist)?;
        let parent = path::clean(dir_path);

        let repos = &self.deps.repos;
        let folders = repos.folders.list_children(&[folder.id], self.user.id).await?;
        let files = repos.files.find_by_folders(&[folder.id], self.user.id).await?;
        self.set_target_dirs([folder]);

        let mut objects = Vec::with_capacity(folders.len() + files.len());
        objects.extend(folders.iter().map(|f| Object::folder(f, &parent)));
        objects.extend(files.iter().map(|f| Object::file(f, &parent)));
        Ok(objects)
    }

    /// Lists physical directories under `path` in the active policy's
    /// backend. Policies whose structure cannot be browsed list nothing.
    pub async fn list_physical(&self, dir_path: &str) -> Result<Vec<Object>, FsError> {
        if !self.policy.can_structure_be_listed() {
            return Ok(Vec::new());
        }
        let objects = self.handler.list(dir_path, false).await?;
        Ok(objects
            .into_iter()
            .filter(|o| o.is_dir)
            .map(|o| Object {
                id: 0,
                name: o.name,
                path: dir_path.to_string(),
                pic: String::new(),
                size: 0,
                object_type: ObjectType::Dir,
                date: o.last_modified.unwrap_or_else(Utc::now),
            })
            .collect())
    }

    /// Renames the first folder of `dirs`, or else the first file of `files`.
    pub async fn rename(&self, dirs: &[i64], files: &[i64], new_name: &str) -> Result<(), FsError> {
        if !is_legal_name(new_name) || (!files.is_empty() && !self.validate_extension(new_name)) {
            return Err(FsError::IllegalObjectName);
        }
        let repos = &self.deps.repos;

        if let Some(&id) = files.first() {
            return repos
                .files
                .rename(id, self.user.id, new_name)
                .await
                .map_err(rename_error);
        }

        if let Some(&id) = dirs.first() {
            let folder = repos
                .folders
                .find_by_id(id, self.user.id)
                .await
                .map_err(rename_error)?;
            if folder.parent_id.is_none() {
                return Err(FsError::RootProtected);
            }
            return repos
                .folders
                .rename(id, self.user.id, new_name)
                .await
                .map_err(rename_error);
        }

        Err(FsError::PathNotExist)
    }

    /// Copies folders and files from `src` into `dst`.
    ///
    /// Copies share the physical objects of their sources. Their total size
    /// is charged without a capacity check, including on partial failure.
    pub async fn copy(
        &mut self,
        dirs: &[i64],
        files: &[i64],
        src: &str,
        dst: &str,
    ) -> Result<(), FsError> {
        let src_folder = self.is_path_exist(src).await?.ok_or(FsError::PathNotExist)?;
        let dst_folder = self.is_path_exist(dst).await?.ok_or(FsError::PathNotExist)?;

        let mut copied = 0u64;
        let result = self
            .copy_into(dirs, files, &src_folder, &dst_folder, src, dst, &mut copied)
            .await;

        let quota = self.quota();
        quota.increase_without_check(&mut self.user, copied).await?;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn copy_into(
        &self,
        dirs: &[i64],
        files: &[i64],
        src_folder: &Folder,
        dst_folder: &Folder,
        src: &str,
        dst: &str,
        copied: &mut u64,
    ) -> Result<(), FsError> {
        let repos = &self.deps.repos;
        let uid = self.user.id;

        let roots: Vec<Folder> = if dirs.is_empty() {
            Vec::new()
        } else {
            repos
                .folders
                .find_by_ids(dirs, uid)
                .await?
                .into_iter()
                .filter(|f| f.parent_id == Some(src_folder.id))
                .collect()
        };
        reject_self_nesting(&roots, src, dst)?;

        // Breadth-first over (source folder, new parent).
        let mut queue: Vec<(Folder, i64)> = roots.into_iter().map(|f| (f, dst_folder.id)).collect();
        while let Some((folder, new_parent)) = queue.pop() {
            let created = repos
                .folders
                .create(NewFolder {
                    name: folder.name.clone(),
                    parent_id: Some(new_parent),
                    owner_id: uid,
                })
                .await
                .map_err(rename_error)?;

            for file in repos.files.find_by_folders(&[folder.id], uid).await? {
                *copied += self.copy_file_row(&file, created.id).await?;
            }
            for child in repos.folders.list_children(&[folder.id], uid).await? {
                queue.push((child, created.id));
            }
        }

        if !files.is_empty() {
            for file in repos.files.find_by_ids(files, uid).await? {
                if file.folder_id == src_folder.id {
                    *copied += self.copy_file_row(&file, dst_folder.id).await?;
                }
            }
        }
        Ok(())
    }

    async fn copy_file_row(&self, file: &File, folder_id: i64) -> Result<u64, FsError> {
        self.deps
            .repos
            .files
            .create(NewFile {
                name: file.name.clone(),
                source_name: file.source_name.clone(),
                user_id: self.user.id,
                size: file.size,
                pic_info: file.pic_info.clone(),
                folder_id,
                policy_id: file.policy_id,
            })
            .await
            .map_err(rename_error)?;
        Ok(file.size)
    }

    /// Moves folders and files from `src` into `dst`. Items not directly
    /// inside `src` are ignored.
    pub async fn move_objects(
        &self,
        dirs: &[i64],
        files: &[i64],
        src: &str,
        dst: &str,
    ) -> Result<(), FsError> {
        let src_folder = self.is_path_exist(src).await?.ok_or(FsError::PathNotExist)?;
        let dst_folder = self.is_path_exist(dst).await?.ok_or(FsError::PathNotExist)?;
        let repos = &self.deps.repos;
        let uid = self.user.id;

        if !dirs.is_empty() {
            let moved: Vec<Folder> = repos
                .folders
                .find_by_ids(dirs, uid)
                .await?
                .into_iter()
                .filter(|f| f.parent_id == Some(src_folder.id))
                .collect();
            reject_self_nesting(&moved, src, dst)?;
            let ids: Vec<i64> = moved.iter().map(|f| f.id).collect();
            if !ids.is_empty() {
                repos
                    .folders
                    .move_to(&ids, uid, dst_folder.id)
                    .await
                    .map_err(rename_error)?;
            }
        }

        if !files.is_empty() {
            let ids: Vec<i64> = repos
                .files
                .find_by_ids(files, uid)
                .await?
                .into_iter()
                .filter(|f| f.folder_id == src_folder.id)
                .map(|f| f.id)
                .collect();
            if !ids.is_empty() {
                repos
                    .files
                    .move_to(&ids, uid, dst_folder.id)
                    .await
                    .map_err(rename_error)?;
            }
        }
        Ok(())
    }

    /// Deletes folders recursively and files, physical objects first.
    ///
    /// Objects still referenced by rows outside the batch are kept. Rows
    /// whose object could not be removed are kept unless `force` is set;
    /// folders are only removed when every file row was. Only the sizes of
    /// removed rows are refunded.
    pub async fn delete(&mut self, dirs: &[i64], files: &[i64], force: bool) -> Result<(), FsError> {
        let uid = self.user.id;
        let repos = self.deps.repos.clone();

        if !dirs.is_empty() {
            let top = repos.folders.find_by_ids(dirs, uid).await?;
            if top.iter().any(|f| f.parent_id.is_none()) {
                return Err(FsError::RootProtected);
            }
            let mut frontier: Vec<i64> = top.iter().map(|f| f.id).collect();
            self.set_target_dirs(top);
            while !frontier.is_empty() {
                let children = repos.folders.list_children(&frontier, uid).await?;
                frontier = children.iter().map(|f| f.id).collect();
                self.set_target_dirs(children);
            }
            let folder_ids: Vec<i64> = self.dir_target.iter().map(|f| f.id).collect();
            let contained = repos.files.find_by_folders(&folder_ids, uid).await?;
            self.set_target_files(contained);
        }
        if !files.is_empty() {
            let selected = repos.files.find_by_ids(files, uid).await?;
            self.set_target_files(selected);
        }

        let mut seen = HashSet::new();
        self.file_target.retain(|f| seen.insert(f.id));
        let targets = self.file_target.clone();
        let target_ids: HashSet<i64> = targets.iter().map(|f| f.id).collect();

        let mut by_policy: BTreeMap<i64, Vec<&File>> = BTreeMap::new();
        for file in &targets {
            by_policy.entry(file.policy_id).or_default().push(file);
        }

        let mut failed: HashSet<(i64, String)> = HashSet::new();
        for (policy_id, group) in by_policy {
            let mut sources: Vec<String> = group.iter().map(|f| f.source_name.clone()).collect();
            sources.sort();
            sources.dedup();

            let linked: HashSet<String> = match repos.files.find_by_sources(policy_id, &sources).await {
                Ok(rows) => rows
                    .into_iter()
                    .filter(|f| !target_ids.contains(&f.id))
                    .map(|f| f.source_name)
                    .collect(),
                Err(e) => {
                    tracing::warn!(policy_id, error = %e, "failed to check soft links");
                    failed.extend(sources.into_iter().map(|s| (policy_id, s)));
                    continue;
                }
            };
            let physical: Vec<String> = sources.into_iter().filter(|s| !linked.contains(s)).collect();
            if physical.is_empty() {
                continue;
            }

            if let Err(e) = self.switch_policy_by_id(policy_id).await {
                tracing::warn!(policy_id, error = %e, "cannot reach storage policy for delete");
                failed.extend(physical.into_iter().map(|s| (policy_id, s)));
                continue;
            }
            if let Err(e) = self.handler.delete(&physical).await {
                tracing::warn!(policy_id, failed = e.failed.len(), error = %e.source, "physical delete incomplete");
                failed.extend(e.failed.into_iter().map(|s| (policy_id, s)));
            }
        }

        let (deleted, kept): (Vec<&File>, Vec<&File>) = targets
            .iter()
            .partition(|f| force || !failed.contains(&(f.policy_id, f.source_name.clone())));

        let deleted_ids: Vec<i64> = deleted.iter().map(|f| f.id).collect();
        if !deleted_ids.is_empty() {
            repos.files.delete_by_ids(&deleted_ids).await?;
        }
        let freed: u64 = deleted.iter().map(|f| f.size).sum();
        let quota = self.quota();
        quota.deduct(&mut self.user, freed).await;

        if kept.is_empty() {
            let folder_ids: Vec<i64> = self.dir_target.iter().map(|f| f.id).collect();
            if !folder_ids.is_empty() {
                repos.folders.delete_by_ids(&folder_ids).await?;
            }
            return Ok(());
        }
        Err(FsError::PartialFailure { failed: kept.len() })
    }

    /// Targets the file at `full_path` unless a file target is already set,
    /// and binds to that file's policy.
    pub async fn reset_file_if_not_exist(&mut self, full_path: &str) -> Result<(), FsError> {
        if self.file_target.is_empty() {
            let file = self
                .is_file_exist(full_path)
                .await?
                .ok_or(FsError::ObjectNotExist)?;
            self.set_target_files([file]);
        }
        let policy_id = self.file_target[0].policy_id;
        self.switch_policy_by_id(policy_id).await
    }

    /// Targets the file with `id` unless a file target is already set, and
    /// binds to that file's policy.
    pub async fn reset_file_id_if_not_exist(&mut self, id: i64) -> Result<(), FsError> {
        if self.file_target.is_empty() {
            let file = match self.deps.repos.files.find_by_id(id, self.user.id).await {
                Ok(file) => file,
                Err(RepoError::NotFound(_)) => return Err(FsError::ObjectNotExist),
                Err(e) => return Err(e.into()),
            };
            self.set_target_files([file]);
        }
        let policy_id = self.file_target[0].policy_id;
        self.switch_policy_by_id(policy_id).await
    }

    /// Permanent link to a file, for policies that allow them.
    pub async fn get_source(&mut self, id: i64) -> Result<String, FsError> {
        self.reset_file_id_if_not_exist(id).await?;
        if !self.policy.is_origin_link_enable {
            return Err(FsError::SourceLinkDisabled);
        }
        let file = self.file_target[0].clone();
        let opts = SourceOptions {
            ttl: 0,
            is_download: false,
            speed: 0,
            file: file.clone(),
        };
        Ok(self.handler.source(&file.source_name, opts).await?)
    }

    /// Time-limited download link, capped at the user's group speed.
    pub async fn get_download_url(&mut self, id: i64, ttl: i64) -> Result<String, FsError> {
        self.reset_file_id_if_not_exist(id).await?;
        let file = self.file_target[0].clone();
        let opts = SourceOptions {
            ttl,
            is_download: true,
            speed: self.user.group.speed_limit,
            file: file.clone(),
        };
        Ok(self.handler.source(&file.source_name, opts).await?)
    }

    /// Opens a file's content.
    pub async fn get_content(&mut self, id: i64) -> Result<ByteStream, FsError> {
        self.reset_file_id_if_not_exist(id).await?;
        let source = self.file_target[0].source_name.clone();
        Ok(self.handler.get(&source).await?)
    }
}

/// Rejects moving or copying a folder into itself or its own subtree.
fn reject_self_nesting(folders: &[Folder], src: &str, dst: &str) -> Result<(), FsError> {
    let dst = path::clean(dst);
    for folder in folders {
        let moved = path::join(&[src, &folder.name]);
        if dst == moved || path::is_within(&moved, &dst) {
            return Err(FsError::IllegalObjectName);
        }
    }
    Ok(())
}
