//! Typed state shared by the hooks of one upload.

use tokio_util::sync::CancellationToken;

use crate::model::File;
use crate::quota::RefundGuard;

/// Metadata of the incoming file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    /// Display name.
    pub name: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Virtual directory the file goes into.
    pub virtual_path: String,
}

impl FileHeader {
    /// Creates a header.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64, virtual_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            virtual_path: virtual_path.into(),
        }
    }
}

/// Carrier passed by `&mut` through every hook of one operation.
#[derive(Debug, Clone)]
pub struct UploadContext {
    /// Incoming file.
    pub file: FileHeader,
    /// Physical destination, set before `put`.
    pub save_path: String,
    /// Existing row being overwritten, for content updates.
    pub original_file: Option<File>,
    /// Row created or updated by the after-upload hooks.
    pub file_model: Option<File>,
    /// Reject the write when the destination exists.
    pub disable_overwrite: bool,
    /// Outstanding capacity reservation.
    pub refund: RefundGuard,
    /// Cancellation for this operation; a child of the caller's token.
    pub cancel: CancellationToken,
}

impl UploadContext {
    /// Creates a context whose cancellation follows `parent`.
    #[must_use]
    pub fn new(file: FileHeader, parent: &CancellationToken) -> Self {
        Self {
            file,
            save_path: String::new(),
            original_file: None,
            file_model: None,
            disable_overwrite: false,
            refund: RefundGuard::default(),
            cancel: parent.child_token(),
        }
    }

    /// Sets the physical destination.
    #[must_use]
    pub fn with_save_path(mut self, save_path: impl Into<String>) -> Self {
        self.save_path = save_path.into();
        self
    }

    /// Marks the operation as overwriting `file`.
    #[must_use]
    pub fn with_original(mut self, file: File) -> Self {
        self.save_path.clone_from(&file.source_name);
        self.original_file = Some(file);
        self
    }

    /// Rejects existing destinations.
    #[must_use]
    pub fn without_overwrite(mut self) -> Self {
        self.disable_overwrite = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CancellationToken::new();
        let ctx = UploadContext::new(FileHeader::new("a.txt", 1, "/"), &parent);
        ctx.cancel.cancel();
        assert!(!parent.is_cancelled());

        let ctx = UploadContext::new(FileHeader::new("a.txt", 1, "/"), &parent);
        parent.cancel();
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn test_with_original_uses_its_source() {
        let file = fixtures::file(3, "a.txt", 5);
        let ctx = UploadContext::new(FileHeader::new("a.txt", 9, "/"), &CancellationToken::new())
            .with_original(file.clone());
        assert_eq!(ctx.save_path, file.source_name);
        assert_eq!(ctx.original_file, Some(file));
    }
}
