//! Hook registry and the built-in hooks.
//!
//! Hooks are registered per [`HookPoint`] on one facade and run in
//! registration order. The first failing hook stops the chain; its error is
//! logged and returned to the caller of [`FileSystem::trigger`].

use std::io::Cursor;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::context::UploadContext;
use super::thumb::is_image_name;
use super::{FileSystem, FsError};
use crate::driver::PutOptions;
use crate::repository::RepoError;

/// Points in an upload at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before any byte is written.
    BeforeUpload,
    /// After the handler accepted the bytes.
    AfterUpload,
    /// The handler failed.
    AfterUploadFailed,
    /// A hook after the write failed.
    AfterValidateFailed,
    /// The client canceled mid-write.
    AfterUploadCanceled,
    /// Before a file row is inserted for already stored bytes.
    BeforeAddFile,
    /// A `BeforeAddFile` hook failed.
    BeforeAddFileFailed,
}

/// Caller-supplied hook.
pub type CustomHook = Arc<dyn Fn(&mut UploadContext) -> Result<(), FsError> + Send + Sync>;

/// A hook.
#[derive(Clone)]
pub enum Hook {
    /// Size, name and extension checks.
    ValidateFile,
    /// Reserves capacity and arms the refund guard.
    ValidateCapacity,
    /// Compares against remaining capacity without reserving.
    ValidateCapacityWithoutIncrease,
    /// Charges or releases the size difference of an overwrite.
    ChangeCapacity,
    /// Removes the written object; never fails.
    DeleteTempFile,
    /// Truncates the object at the save path.
    CleanFileContent,
    /// Releases the overwritten file's charge and zeroes its size.
    ClearFileSize,
    /// Cancels the context's token.
    CancelContext,
    /// Refunds the outstanding reservation once.
    GiveBackCapacity,
    /// Points the overwritten row at the save path.
    UpdateSourceName,
    /// Records the new size of an overwritten file.
    GenericAfterUpdate,
    /// Requires the overwritten file to still exist.
    IsFileExist,
    /// Rebinds to the overwritten file's policy.
    ResetPolicy,
    /// Inserts the file row of a finished upload.
    GenericAfterUpload,
    /// Caller-supplied hook.
    Custom(CustomHook),
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ValidateFile => "ValidateFile",
            Self::ValidateCapacity => "ValidateCapacity",
            Self::ValidateCapacityWithoutIncrease => "ValidateCapacityWithoutIncrease",
            Self::ChangeCapacity => "ChangeCapacity",
            Self::DeleteTempFile => "DeleteTempFile",
            Self::CleanFileContent => "CleanFileContent",
            Self::ClearFileSize => "ClearFileSize",
            Self::CancelContext => "CancelContext",
            Self::GiveBackCapacity => "GiveBackCapacity",
            Self::UpdateSourceName => "UpdateSourceName",
            Self::GenericAfterUpdate => "GenericAfterUpdate",
            Self::IsFileExist => "IsFileExist",
            Self::ResetPolicy => "ResetPolicy",
            Self::GenericAfterUpload => "GenericAfterUpload",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl FileSystem {
    /// Registers `hook` at `point`, after any hooks already there.
    pub fn use_hook(&mut self, point: HookPoint, hook: Hook) {
        self.hooks.entry(point).or_default().push(hook);
    }

    /// Removes every hook at `point`.
    pub fn clean_hooks(&mut self, point: HookPoint) {
        self.hooks.remove(&point);
    }

    /// Number of hooks registered at `point`.
    #[must_use]
    pub fn hook_count(&self, point: HookPoint) -> usize {
        self.hooks.get(&point).map_or(0, Vec::len)
    }

    pub(super) fn has_hooks(&self) -> bool {
        !self.hooks.is_empty()
    }

    /// Runs the hooks at `point` in order, stopping at the first error.
    pub fn trigger<'a>(
        &'a mut self,
        point: HookPoint,
        ctx: &'a mut UploadContext,
    ) -> BoxFuture<'a, Result<(), FsError>> {
        Box::pin(async move {
            let hooks = self.hooks.get(&point).cloned().unwrap_or_default();
            for hook in &hooks {
                if let Err(e) = self.run_hook(hook, ctx).await {
                    tracing::warn!(
                        point = ?point,
                        hook = ?hook,
                        user_id = self.user.id,
                        error = %e,
                        "hook failed"
                    );
                    return Err(e);
                }
            }
            Ok(())
        })
    }

    async fn run_hook(&mut self, hook: &Hook, ctx: &mut UploadContext) -> Result<(), FsError> {
        match hook {
            Hook::ValidateFile => self.validate_file(&ctx.file),
            Hook::ValidateCapacity => self.hook_validate_capacity(ctx).await,
            Hook::ValidateCapacityWithoutIncrease => {
                if self.user.remaining_capacity() < ctx.file.size {
                    Err(FsError::InsufficientCapacity)
                } else {
                    Ok(())
                }
            }
            Hook::ChangeCapacity => self.hook_change_capacity(ctx).await,
            Hook::DeleteTempFile => {
                if let Err(e) = self.handler.delete(&[ctx.save_path.clone()]).await {
                    tracing::warn!(path = %ctx.save_path, error = %e, "failed to remove uploaded object");
                }
                Ok(())
            }
            Hook::CleanFileContent => {
                self.handler
                    .put(
                        Box::pin(Cursor::new(Vec::new())),
                        &ctx.save_path,
                        0,
                        PutOptions::default(),
                    )
                    .await?;
                Ok(())
            }
            Hook::ClearFileSize => self.hook_clear_file_size(ctx).await,
            Hook::CancelContext => {
                ctx.cancel.cancel();
                Ok(())
            }
            Hook::GiveBackCapacity => {
                let reserved = ctx.refund.take();
                let quota = self.quota();
                if !quota.deduct(&mut self.user, reserved).await {
                    tracing::warn!(user_id = self.user.id, reserved, "refund was not fully applied");
                }
                Ok(())
            }
            Hook::UpdateSourceName => {
                let original = ctx.original_file.as_mut().ok_or(FsError::ObjectNotExist)?;
                self.deps
                    .repos
                    .files
                    .update_source_name(original.id, &ctx.save_path)
                    .await?;
                original.source_name.clone_from(&ctx.save_path);
                Ok(())
            }
            Hook::GenericAfterUpdate => self.hook_after_update(ctx).await,
            Hook::IsFileExist => {
                let original = ctx.original_file.as_ref().ok_or(FsError::ObjectNotExist)?;
                match self.deps.repos.files.find_by_id(original.id, self.user.id).await {
                    Ok(current) => {
                        ctx.original_file = Some(current);
                        Ok(())
                    }
                    Err(RepoError::NotFound(_)) => Err(FsError::ObjectNotExist),
                    Err(e) => Err(e.into()),
                }
            }
            Hook::ResetPolicy => {
                let policy_id = ctx
                    .original_file
                    .as_ref()
                    .ok_or(FsError::ObjectNotExist)?
                    .policy_id;
                self.switch_policy_by_id(policy_id).await
            }
            Hook::GenericAfterUpload => self.hook_after_upload(ctx).await,
            Hook::Custom(f) => f(ctx),
        }
    }

    async fn hook_validate_capacity(&mut self, ctx: &mut UploadContext) -> Result<(), FsError> {
        let size = ctx.file.size;
        let quota = self.quota();
        if !quota.increase(&mut self.user, size).await? {
            return Err(FsError::InsufficientCapacity);
        }
        ctx.refund.arm(size);
        Ok(())
    }

    async fn hook_change_capacity(&mut self, ctx: &mut UploadContext) -> Result<(), FsError> {
        let old = ctx
            .original_file
            .as_ref()
            .ok_or(FsError::ObjectNotExist)?
            .size;
        let new = ctx.file.size;
        let quota = self.quota();
        if new > old {
            let delta = new - old;
            if !quota.increase(&mut self.user, delta).await? {
                return Err(FsError::InsufficientCapacity);
            }
            ctx.refund.arm(delta);
        } else {
            quota.deduct(&mut self.user, old - new).await;
        }
        Ok(())
    }

    async fn hook_clear_file_size(&mut self, ctx: &mut UploadContext) -> Result<(), FsError> {
        let original = ctx.original_file.as_mut().ok_or(FsError::ObjectNotExist)?;
        // Charged for the smaller of both sizes; any growth is still guarded.
        let charged = original.size.min(ctx.file.size);
        self.deps.repos.files.update_size(original.id, 0).await?;
        original.size = 0;
        let quota = self.quota();
        quota.deduct(&mut self.user, charged).await;
        Ok(())
    }

    async fn hook_after_update(&mut self, ctx: &mut UploadContext) -> Result<(), FsError> {
        let mut file = ctx
            .original_file
            .clone()
            .ok_or(FsError::ObjectNotExist)?;
        self.deps
            .repos
            .files
            .update_size(file.id, ctx.file.size)
            .await?;
        file.size = ctx.file.size;

        if !file.pic_info.is_empty() && self.policy.is_thumb_generate_needed() {
            let thumb = format!("{}{}", file.source_name, self.deps.thumb_suffix);
            if let Err(e) = self.handler.delete(&[thumb]).await {
                tracing::warn!(file_id = file.id, error = %e, "failed to remove stale thumbnail");
            }
            self.spawn_thumbnail(file.clone());
        }

        ctx.file_model = Some(file);
        Ok(())
    }

    async fn hook_after_upload(&mut self, ctx: &mut UploadContext) -> Result<(), FsError> {
        let folder = self.ensure_directory(&ctx.file.virtual_path).await?;
        if self.is_child_file_exist(&folder, &ctx.file.name).await?.is_some() {
            return Err(FsError::FileExisted);
        }

        let file = self.add_file(ctx, &folder).await?;
        if self.policy.is_thumb_generate_needed() && is_image_name(&file.name) {
            self.spawn_thumbnail(file.clone());
        }
        ctx.file_model = Some(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::context::FileHeader;
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn ctx(name: &str, size: u64) -> UploadContext {
        UploadContext::new(FileHeader::new(name, size, "/"), &CancellationToken::new())
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_stop_at_first_error() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let first = calls.clone();
        fs.use_hook(
            HookPoint::BeforeUpload,
            Hook::Custom(Arc::new(move |_| {
                assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
                Ok(())
            })),
        );
        fs.use_hook(
            HookPoint::BeforeUpload,
            Hook::Custom(Arc::new(|_| Err(FsError::IllegalObjectName))),
        );
        let never = calls.clone();
        fs.use_hook(
            HookPoint::BeforeUpload,
            Hook::Custom(Arc::new(move |_| {
                never.fetch_add(100, Ordering::SeqCst);
                Ok(())
            })),
        );

        let mut ctx = ctx("a.txt", 1);
        let err = fs.trigger(HookPoint::BeforeUpload, &mut ctx).await.unwrap_err();
        assert!(matches!(err, FsError::IllegalObjectName));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_point_is_ok() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        let mut ctx = ctx("a.txt", 1);
        fs.trigger(HookPoint::AfterUpload, &mut ctx).await.expect("no hooks");
    }

    #[tokio::test]
    async fn test_give_back_capacity_refunds_once() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::BeforeUpload, Hook::ValidateCapacity);
        fs.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);
        fs.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);

        let mut ctx = ctx("a.txt", 30);
        fs.trigger(HookPoint::BeforeUpload, &mut ctx).await.expect("reserve");
        assert_eq!(store.user(1).storage, 30);

        fs.trigger(HookPoint::AfterValidateFailed, &mut ctx).await.expect("refund");
        fs.trigger(HookPoint::AfterUploadFailed, &mut ctx).await.expect("noop");
        assert_eq!(store.user(1).storage, 0);
    }

    #[tokio::test]
    async fn test_validate_capacity_rejects_without_charge() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::BeforeUpload, Hook::ValidateCapacity);

        let mut ctx = ctx("a.txt", 101);
        let err = fs.trigger(HookPoint::BeforeUpload, &mut ctx).await.unwrap_err();
        assert!(matches!(err, FsError::InsufficientCapacity));
        assert_eq!(ctx.refund.pending(), 0);
        assert_eq!(store.user(1).storage, 0);
    }

    #[tokio::test]
    async fn test_capacity_without_increase_only_compares() {
        let store = MemoryStore::with_user(100);
        store.set_storage(1, 60);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::BeforeUpload, Hook::ValidateCapacityWithoutIncrease);

        let mut ok = ctx("a.txt", 40);
        fs.trigger(HookPoint::BeforeUpload, &mut ok).await.expect("fits");
        let mut too_big = ctx("a.txt", 41);
        assert!(fs.trigger(HookPoint::BeforeUpload, &mut too_big).await.is_err());
        assert_eq!(store.user(1).storage, 60);
    }

    #[tokio::test]
    async fn test_change_capacity_grow_and_shrink() {
        let store = MemoryStore::with_user(100);
        store.set_storage(1, 50);
        let original = store.seed_file(1, "a.txt", 50);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::BeforeUpload, Hook::ChangeCapacity);

        let mut grow = ctx("a.txt", 80).with_original(original.clone());
        fs.trigger(HookPoint::BeforeUpload, &mut grow).await.expect("grow");
        assert_eq!(store.user(1).storage, 80);
        assert_eq!(grow.refund.pending(), 30);

        let mut shrink = ctx("a.txt", 20).with_original(original.clone());
        fs.trigger(HookPoint::BeforeUpload, &mut shrink).await.expect("shrink");
        assert_eq!(store.user(1).storage, 50);

        let mut over = ctx("a.txt", 200).with_original(original);
        let err = fs.trigger(HookPoint::BeforeUpload, &mut over).await.unwrap_err();
        assert!(matches!(err, FsError::InsufficientCapacity));
    }

    #[tokio::test]
    async fn test_clear_file_size_after_growth_releases_everything() {
        let store = MemoryStore::with_user(100);
        store.set_storage(1, 50);
        let original = store.seed_file(1, "a.txt", 50);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::BeforeUpload, Hook::ChangeCapacity);
        fs.use_hook(HookPoint::AfterValidateFailed, Hook::ClearFileSize);
        fs.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);

        let mut ctx = ctx("a.txt", 80).with_original(original.clone());
        fs.trigger(HookPoint::BeforeUpload, &mut ctx).await.expect("grow");
        fs.trigger(HookPoint::AfterValidateFailed, &mut ctx).await.expect("clear");

        assert_eq!(store.user(1).storage, 0);
        assert_eq!(store.file(original.id).map(|f| f.size), Some(0));
    }

    #[tokio::test]
    async fn test_delete_temp_file_never_fails() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.fail_delete_of("uploads/1/a.txt");
        let mut fs = fixtures::fs(&store, handler).await;
        fs.use_hook(HookPoint::AfterValidateFailed, Hook::DeleteTempFile);

        let mut ctx = ctx("a.txt", 1).with_save_path("uploads/1/a.txt");
        fs.trigger(HookPoint::AfterValidateFailed, &mut ctx)
            .await
            .expect("best effort");
    }

    #[tokio::test]
    async fn test_clean_file_content_truncates() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.insert("uploads/1/a.txt", b"old content");
        let mut fs = fixtures::fs(&store, handler.clone()).await;
        fs.use_hook(HookPoint::AfterUploadCanceled, Hook::CleanFileContent);

        let mut ctx = ctx("a.txt", 1).with_save_path("uploads/1/a.txt");
        fs.trigger(HookPoint::AfterUploadCanceled, &mut ctx)
            .await
            .expect("clean");
        assert_eq!(handler.object("uploads/1/a.txt"), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_is_file_exist_and_update_source_name() {
        let store = MemoryStore::with_user(100);
        let original = store.seed_file(1, "a.txt", 5);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::AfterUpload, Hook::IsFileExist);
        fs.use_hook(HookPoint::AfterUpload, Hook::UpdateSourceName);

        let mut ctx = ctx("a.txt", 5)
            .with_original(original.clone())
            .with_save_path("moved/a.txt");
        fs.trigger(HookPoint::AfterUpload, &mut ctx).await.expect("update");
        assert_eq!(
            store.file(original.id).map(|f| f.source_name),
            Some("moved/a.txt".to_string())
        );

        store.remove_file(original.id);
        let err = fs.trigger(HookPoint::AfterUpload, &mut ctx).await.unwrap_err();
        assert!(matches!(err, FsError::ObjectNotExist));
    }

    #[tokio::test]
    async fn test_reset_policy_follows_original_file() {
        let store = MemoryStore::with_user(100);
        let mut s3 = fixtures::local_policy(2);
        s3.policy_type = "s3".to_string();
        store.add_policy(s3);
        let mut original = store.seed_file(1, "a.txt", 5);
        original.policy_id = 2;

        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::BeforeUpload, Hook::ResetPolicy);
        let mut ctx = ctx("a.txt", 5).with_original(original);
        fs.trigger(HookPoint::BeforeUpload, &mut ctx).await.expect("reset");
        assert_eq!(fs.policy.id, 2);
    }

    #[tokio::test]
    async fn test_cancel_context_cancels_only_the_context() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::AfterUpload, Hook::CancelContext);

        let parent = CancellationToken::new();
        let mut ctx = UploadContext::new(FileHeader::new("a.txt", 1, "/"), &parent);
        fs.trigger(HookPoint::AfterUpload, &mut ctx).await.expect("cancel");
        assert!(ctx.cancel.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_after_upload_rejects_name_collision() {
        let store = MemoryStore::with_user(100);
        store.seed_file(1, "a.txt", 5);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::AfterUpload, Hook::GenericAfterUpload);

        let mut ctx = ctx("a.txt", 5).with_save_path("uploads/1/a.txt");
        let err = fs.trigger(HookPoint::AfterUpload, &mut ctx).await.unwrap_err();
        assert!(matches!(err, FsError::FileExisted));
    }

    #[tokio::test]
    async fn test_after_upload_creates_missing_folder() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        fs.use_hook(HookPoint::AfterUpload, Hook::GenericAfterUpload);

        let mut ctx = UploadContext::new(
            FileHeader::new("a.txt", 5, "/new/nested"),
            &CancellationToken::new(),
        )
        .with_save_path("uploads/1/new/nested/a.txt");
        fs.trigger(HookPoint::AfterUpload, &mut ctx).await.expect("insert");

        let file = ctx.file_model.expect("file model");
        assert_eq!(file.source_name, "uploads/1/new/nested/a.txt");
        let folder = fs.is_path_exist("/new/nested").await.expect("lookup");
        assert_eq!(folder.map(|f| f.id), Some(file.folder_id));
    }
}
