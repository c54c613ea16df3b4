//! Virtual file system facade.
//!
//! A [`FileSystem`] is built for one user and one logical operation. It binds
//! the user's active policy to a [`Handler`], keeps the operation's targets
//! and hook registry, and exposes upload, management, archive and thumbnail
//! operations on top of the persistence traits.
//!
//! Nothing is shared between facades except the injected [`FsDeps`].

mod archive;
mod callback;
mod context;
mod error;
mod hooks;
mod manage;
pub mod path;
mod thumb;
mod upload;
mod validator;

pub use archive::ArchiveMode;
pub use callback::{CALLBACK_SESSION_PREFIX, CallbackBody, UploadSession, load_session};
pub use context::{FileHeader, UploadContext};
pub use error::{ErrorKind, FsError};
pub use hooks::{CustomHook, Hook, HookPoint};
pub use manage::{Object, ObjectType};
pub use thumb::{
    HANDLED_EXTENSIONS, ImageThumbnailer, ThumbError, ThumbResponse, Thumbnail, Thumbnailer,
    is_image_name,
};
pub use upload::SizeLimitedStream;
pub use validator::{is_in_extension_list, is_legal_name};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::driver::{Handler, HandlerFactory};
use crate::model::{File, Folder, Policy, User};
use crate::quota::Quota;
use crate::repository::Repositories;
use crate::setting::SettingStore;

/// Process-wide collaborators of every facade.
#[derive(Clone)]
pub struct FsDeps {
    /// Persistence.
    pub repos: Repositories,
    /// Session and memo store.
    pub cache: Arc<dyn CacheStore>,
    /// Policy to handler dispatch.
    pub handlers: Arc<dyn HandlerFactory>,
    /// Runtime settings.
    pub settings: SettingStore,
    /// Image codec.
    pub thumbnailer: Arc<dyn Thumbnailer>,
    /// Scratch directory for archives and staging.
    pub temp_root: PathBuf,
    /// Suffix of stored thumbnails.
    pub thumb_suffix: String,
}

impl FsDeps {
    /// Loads a user and builds a facade bound to their active policy.
    pub async fn new_fs(&self, user_id: i64) -> Result<FileSystem, FsError> {
        let user = self.repos.users.find_by_id(user_id).await?;
        FileSystem::new(self.clone(), user)
    }

    /// Capacity ledger over the user repository.
    #[must_use]
    pub fn quota(&self) -> Quota {
        Quota::new(self.repos.users.clone())
    }
}

/// Per-operation file system facade.
pub struct FileSystem {
    deps: FsDeps,
    /// Acting user.
    pub user: User,
    /// Policy the handler is currently bound to.
    pub policy: Policy,
    handler: Arc<dyn Handler>,
    hooks: HashMap<HookPoint, Vec<Hook>>,
    /// Files the current operation acts on.
    pub file_target: Vec<File>,
    /// Folders the current operation acts on.
    pub dir_target: Vec<Folder>,
    /// Folder path resolution starts from, instead of the user's root.
    pub root: Option<Folder>,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("user_id", &self.user.id)
            .field("policy_id", &self.policy.id)
            .field("file_target", &self.file_target.len())
            .field("dir_target", &self.dir_target.len())
            .finish_non_exhaustive()
    }
}

impl FileSystem {
    /// Builds a facade bound to the user's active policy.
    pub fn new(deps: FsDeps, user: User) -> Result<Self, FsError> {
        let policy = user.policy.clone();
        let handler = deps.handlers.build(&policy)?;
        Ok(Self {
            deps,
            user,
            policy,
            handler,
            hooks: HashMap::new(),
            file_target: Vec::new(),
            dir_target: Vec::new(),
            root: None,
        })
    }

    /// Shared collaborators.
    #[must_use]
    pub fn deps(&self) -> &FsDeps {
        &self.deps
    }

    /// Handler bound to the current policy.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    /// Rebinds the handler to another policy.
    pub fn switch_policy(&mut self, policy: Policy) -> Result<(), FsError> {
        if policy.id == self.policy.id && policy.policy_type == self.policy.policy_type {
            return Ok(());
        }
        self.handler = self.deps.handlers.build(&policy)?;
        self.policy = policy;
        Ok(())
    }

    /// Rebinds the handler to the policy with `policy_id`.
    pub async fn switch_policy_by_id(&mut self, policy_id: i64) -> Result<(), FsError> {
        if policy_id == self.policy.id {
            return Ok(());
        }
        let policy = self.deps.repos.policies.find_by_id(policy_id).await?;
        self.switch_policy(policy)
    }

    /// Clears targets, hooks and root, and rebinds to the user's policy.
    pub fn reset(&mut self) -> Result<(), FsError> {
        self.clean_targets();
        self.hooks.clear();
        self.root = None;
        self.switch_policy(self.user.policy.clone())
    }

    /// Adds files to the target list.
    pub fn set_target_files(&mut self, files: impl IntoIterator<Item = File>) {
        self.file_target.extend(files);
    }

    /// Adds folders to the target list.
    pub fn set_target_dirs(&mut self, dirs: impl IntoIterator<Item = Folder>) {
        self.dir_target.extend(dirs);
    }

    /// Empties both target lists.
    pub fn clean_targets(&mut self) {
        self.file_target.clear();
        self.dir_target.clear();
    }

    fn quota(&self) -> Quota {
        self.deps.quota()
    }
}
