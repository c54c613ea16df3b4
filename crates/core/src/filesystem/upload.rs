//! Upload orchestration.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project::pin_project;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::context::{FileHeader, UploadContext};
use super::hooks::{Hook, HookPoint};
use super::{FileSystem, FsError, path};
use crate::driver::{ByteStream, PutOptions};
use crate::model::{File, Folder, NewFile};
use crate::repository::RepoError;

/// Reader that fails once it yields more or fewer bytes than declared.
#[pin_project]
pub struct SizeLimitedStream<R> {
    #[pin]
    inner: R,
    remaining: u64,
}

impl<R> SizeLimitedStream<R> {
    /// Wraps `inner`, which must yield exactly `declared` bytes.
    pub fn new(inner: R, declared: u64) -> Self {
        Self {
            inner,
            remaining: declared,
        }
    }
}

impl<R: AsyncRead> AsyncRead for SizeLimitedStream<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let wanted = buf.remaining() > 0;
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let read = u64::try_from(buf.filled().len() - before).unwrap_or(u64::MAX);

        if read == 0 && wanted && *this.remaining > 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes before its declared size", this.remaining),
            )));
        }
        if read > *this.remaining {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream exceeds its declared size",
            )));
        }
        *this.remaining -= read;
        Poll::Ready(Ok(()))
    }
}

impl FileSystem {
    /// Physical destination for a new file under the active policy.
    #[must_use]
    pub fn generate_save_path(&self, file: &FileHeader) -> String {
        path::join(&[
            &self.policy.generate_path(self.user.id, &file.virtual_path),
            &self.policy.generate_file_name(self.user.id, &file.name),
        ])
    }

    /// Runs one upload through the registered hooks.
    ///
    /// The stream is dropped unread when `BeforeUpload` fails. The write
    /// races the context's cancellation, with completion polled first.
    pub async fn upload(&mut self, ctx: &mut UploadContext, stream: ByteStream) -> Result<(), FsError> {
        if let Err(e) = self.trigger(HookPoint::BeforeUpload, ctx).await {
            drop(stream);
            return Err(e);
        }

        ctx.save_path = match &ctx.original_file {
            Some(original) => original.source_name.clone(),
            None => self.generate_save_path(&ctx.file),
        };

        let handler = self.handler.clone();
        let cancel = ctx.cancel.clone();
        let limited: ByteStream = Box::pin(SizeLimitedStream::new(stream, ctx.file.size));
        let opts = PutOptions {
            disable_overwrite: ctx.disable_overwrite,
        };
        let outcome = tokio::select! {
            biased;
            res = handler.put(limited, &ctx.save_path, ctx.file.size, opts) => Some(res),
            () = cancel.cancelled() => None,
        };

        match outcome {
            None => {
                tracing::debug!(path = %ctx.save_path, "client canceled upload");
                if let Err(e) = self.trigger(HookPoint::AfterUploadCanceled, ctx).await {
                    tracing::debug!(error = %e, "AfterUploadCanceled hooks failed");
                }
                return Err(FsError::ClientCanceled);
            }
            Some(Err(e)) => {
                if let Err(hook_err) = self.trigger(HookPoint::AfterUploadFailed, ctx).await {
                    tracing::debug!(error = %hook_err, "AfterUploadFailed hooks failed");
                }
                return Err(e.into());
            }
            Some(Ok(())) => {}
        }

        if let Err(e) = self.trigger(HookPoint::AfterUpload, ctx).await {
            if let Err(follow_up) = self.trigger(HookPoint::AfterValidateFailed, ctx).await {
                tracing::debug!(error = %follow_up, "AfterValidateFailed hooks failed");
            }
            return Err(e);
        }

        tracing::info!(
            name = %ctx.file.name,
            size = ctx.file.size,
            user_id = self.user.id,
            path = %ctx.save_path,
            "file uploaded"
        );
        Ok(())
    }

    /// Uploads `stream` to the virtual path `dst` with the standard hook
    /// chain, registering it unless hooks are already present.
    pub async fn upload_from_stream(
        &mut self,
        stream: ByteStream,
        dst: &str,
        size: u64,
        cancel: &CancellationToken,
        disable_overwrite: bool,
    ) -> Result<File, FsError> {
        if !self.has_hooks() {
            self.use_hook(HookPoint::BeforeUpload, Hook::ValidateFile);
            self.use_hook(HookPoint::BeforeUpload, Hook::ValidateCapacity);
            self.use_hook(HookPoint::AfterUploadCanceled, Hook::DeleteTempFile);
            self.use_hook(HookPoint::AfterUploadCanceled, Hook::GiveBackCapacity);
            self.use_hook(HookPoint::AfterUpload, Hook::GenericAfterUpload);
            self.use_hook(HookPoint::AfterValidateFailed, Hook::DeleteTempFile);
            self.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);
            self.use_hook(HookPoint::AfterUploadFailed, Hook::GiveBackCapacity);
        }

        let header = FileHeader::new(path::base(dst), size, path::dir(dst));
        let mut ctx = UploadContext::new(header, cancel);
        ctx.disable_overwrite = disable_overwrite;
        self.upload(&mut ctx, stream).await?;
        ctx.file_model
            .ok_or_else(|| FsError::internal("upload finished without a file record"))
    }

    /// Uploads a local file with the user's own policy.
    pub async fn upload_from_path(
        &mut self,
        src: &Path,
        dst: &str,
        cancel: &CancellationToken,
        disable_overwrite: bool,
    ) -> Result<File, FsError> {
        self.switch_policy(self.user.policy.clone())?;
        let file = tokio::fs::File::open(src).await?;
        let size = file.metadata().await?.len();
        self.upload_from_stream(Box::pin(file), dst, size, cancel, disable_overwrite)
            .await
    }

    /// Replaces the content of an existing file in place.
    pub async fn update_content(
        &mut self,
        id: i64,
        stream: ByteStream,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<File, FsError> {
        let original = match self.deps.repos.files.find_by_id(id, self.user.id).await {
            Ok(file) => file,
            Err(RepoError::NotFound(_)) => return Err(FsError::ObjectNotExist),
            Err(e) => return Err(e.into()),
        };

        self.use_hook(HookPoint::BeforeUpload, Hook::IsFileExist);
        self.use_hook(HookPoint::BeforeUpload, Hook::ResetPolicy);
        self.use_hook(HookPoint::BeforeUpload, Hook::ValidateFile);
        self.use_hook(HookPoint::BeforeUpload, Hook::ChangeCapacity);
        self.use_hook(HookPoint::AfterUploadCanceled, Hook::CleanFileContent);
        self.use_hook(HookPoint::AfterUploadCanceled, Hook::ClearFileSize);
        self.use_hook(HookPoint::AfterUploadCanceled, Hook::GiveBackCapacity);
        self.use_hook(HookPoint::AfterUploadFailed, Hook::GiveBackCapacity);
        self.use_hook(HookPoint::AfterUpload, Hook::GenericAfterUpdate);
        self.use_hook(HookPoint::AfterUpload, Hook::CancelContext);
        self.use_hook(HookPoint::AfterValidateFailed, Hook::CleanFileContent);
        self.use_hook(HookPoint::AfterValidateFailed, Hook::ClearFileSize);
        self.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);

        let header = FileHeader::new(original.name.clone(), size, String::new());
        let mut ctx = UploadContext::new(header, cancel).with_original(original);
        self.upload(&mut ctx, stream).await?;
        ctx.file_model
            .ok_or_else(|| FsError::internal("update finished without a file record"))
    }

    /// Inserts the row for bytes already stored at `ctx.save_path`.
    pub async fn add_file(
        &mut self,
        ctx: &mut UploadContext,
        parent: &Folder,
    ) -> Result<File, FsError> {
        if let Err(e) = self.trigger(HookPoint::BeforeAddFile, ctx).await {
            if let Err(follow_up) = self.trigger(HookPoint::BeforeAddFileFailed, ctx).await {
                tracing::debug!(error = %follow_up, "BeforeAddFileFailed hooks failed");
            }
            return Err(e);
        }

        let new_file = NewFile {
            name: ctx.file.name.clone(),
            source_name: ctx.save_path.clone(),
            user_id: self.user.id,
            size: ctx.file.size,
            pic_info: String::new(),
            folder_id: parent.id,
            policy_id: self.policy.id,
        };
        match self.deps.repos.files.create(new_file).await {
            Ok(file) => Ok(file),
            Err(e) => {
                if let Err(follow_up) = self.trigger(HookPoint::AfterValidateFailed, ctx).await {
                    tracing::debug!(error = %follow_up, "AfterValidateFailed hooks failed");
                }
                Err(FsError::InsertFileRecord(e.to_string()))
            }
        }
    }
}
