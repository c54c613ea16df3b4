//! File system errors.

use thiserror::Error;

use crate::driver::DriverError;
use crate::repository::RepoError;

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is invalid.
    Validation,
    /// The user's capacity would be exceeded.
    QuotaExceeded,
    /// A storage backend failed.
    Backend,
    /// The persistence layer failed.
    Persistence,
    /// Some objects of a batch failed.
    PartialFailure,
    /// The client went away.
    ClientCanceled,
    /// A path or object is missing.
    NotFound,
    /// A name is already taken.
    Conflict,
    /// Anything else.
    Internal,
}

/// File system errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// The policy's type tag has no driver.
    #[error("unknown storage policy type: {0}")]
    UnknownPolicyType(String),

    /// The file exceeds the policy's size limit.
    #[error("file is larger than the policy allows")]
    FileSizeTooBig,

    /// The extension is not on the policy's allow-list.
    #[error("file extension is not allowed")]
    FileExtensionNotAllowed,

    /// The name contains reserved characters or has a bad length.
    #[error("illegal object name")]
    IllegalObjectName,

    /// Not enough capacity left.
    #[error("insufficient capacity")]
    InsufficientCapacity,

    /// The client canceled the operation.
    #[error("operation canceled by client")]
    ClientCanceled,

    /// The root folder cannot be modified.
    #[error("the root folder cannot be modified")]
    RootProtected,

    /// Inserting the file row failed.
    #[error("failed to insert file record: {0}")]
    InsertFileRecord(String),

    /// A file or folder with this name exists.
    #[error("a file or folder with the same name already exists")]
    FileExisted,

    /// A folder with this name exists.
    #[error("a folder with the same name already exists")]
    FolderExisted,

    /// The virtual path does not resolve.
    #[error("path does not exist")]
    PathNotExist,

    /// The file does not exist.
    #[error("object does not exist")]
    ObjectNotExist,

    /// The stored object does not match its upload session.
    #[error("stored object does not match the upload: {0}")]
    ObjectMismatch(String),

    /// The policy does not hand out permanent links.
    #[error("source links are disabled for this policy")]
    SourceLinkDisabled,

    /// An archive entry resolves outside the destination.
    #[error("illegal path in archive: {0}")]
    IllegalArchivePath(String),

    /// Local I/O failed.
    #[error("i/o failure: {0}")]
    Io(String),

    /// A storage backend failed.
    #[error(transparent)]
    Backend(DriverError),

    /// The persistence layer failed.
    #[error(transparent)]
    Persistence(#[from] RepoError),

    /// Part of a batch failed.
    #[error("{failed} objects failed")]
    PartialFailure {
        /// Number of objects that were not processed.
        failed: usize,
    },

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FsError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownPolicyType(_) | Self::Internal(_) | Self::Io(_) => ErrorKind::Internal,
            Self::FileSizeTooBig
            | Self::FileExtensionNotAllowed
            | Self::IllegalObjectName
            | Self::RootProtected
            | Self::SourceLinkDisabled
            | Self::ObjectMismatch(_)
            | Self::IllegalArchivePath(_) => ErrorKind::Validation,
            Self::InsufficientCapacity => ErrorKind::QuotaExceeded,
            Self::ClientCanceled => ErrorKind::ClientCanceled,
            Self::FileExisted | Self::FolderExisted => ErrorKind::Conflict,
            Self::PathNotExist | Self::ObjectNotExist => ErrorKind::NotFound,
            Self::Backend(DriverError::NotFound(_)) => ErrorKind::NotFound,
            Self::Backend(DriverError::Exists(_)) => ErrorKind::Conflict,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Persistence(RepoError::NotFound(_)) => ErrorKind::NotFound,
            Self::Persistence(RepoError::Conflict(_)) => ErrorKind::Conflict,
            Self::Persistence(_) | Self::InsertFileRecord(_) => ErrorKind::Persistence,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownPolicyType(_) => "UNKNOWN_POLICY_TYPE",
            Self::FileSizeTooBig => "FILE_TOO_BIG",
            Self::FileExtensionNotAllowed => "FILE_EXTENSION_NOT_ALLOWED",
            Self::IllegalObjectName => "ILLEGAL_OBJECT_NAME",
            Self::InsufficientCapacity => "INSUFFICIENT_CAPACITY",
            Self::ClientCanceled => "CLIENT_CANCELED",
            Self::RootProtected => "ROOT_PROTECTED",
            Self::InsertFileRecord(_) => "INSERT_FILE_RECORD_FAILED",
            Self::FileExisted => "OBJECT_EXISTED",
            Self::FolderExisted => "FOLDER_EXISTED",
            Self::PathNotExist => "PATH_NOT_EXIST",
            Self::ObjectNotExist => "OBJECT_NOT_EXIST",
            Self::SourceLinkDisabled => "SOURCE_LINK_DISABLED",
            Self::ObjectMismatch(_) => "OBJECT_MISMATCH",
            Self::IllegalArchivePath(_) => "ILLEGAL_ARCHIVE_PATH",
            Self::Io(_) => "IO_FAILED",
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Persistence(_) => "DATABASE_ERROR",
            Self::PartialFailure { .. } => "PARTIAL_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DriverError> for FsError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::UnknownPolicyType(tag) => Self::UnknownPolicyType(tag),
            other => Self::Backend(other),
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for FsError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for FsError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FsError::FileSizeTooBig, ErrorKind::Validation, "FILE_TOO_BIG")]
    #[case(FsError::InsufficientCapacity, ErrorKind::QuotaExceeded, "INSUFFICIENT_CAPACITY")]
    #[case(FsError::ClientCanceled, ErrorKind::ClientCanceled, "CLIENT_CANCELED")]
    #[case(FsError::FileExisted, ErrorKind::Conflict, "OBJECT_EXISTED")]
    #[case(FsError::PathNotExist, ErrorKind::NotFound, "PATH_NOT_EXIST")]
    #[case(FsError::PartialFailure { failed: 2 }, ErrorKind::PartialFailure, "PARTIAL_FAILURE")]
    #[case(FsError::ObjectMismatch("size".into()), ErrorKind::Validation, "OBJECT_MISMATCH")]
    #[case(
        FsError::Persistence(RepoError::conflict("files")),
        ErrorKind::Conflict,
        "DATABASE_ERROR"
    )]
    fn test_kind_and_code(#[case] err: FsError, #[case] kind: ErrorKind, #[case] code: &str) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.code(), code);
    }

    #[test]
    fn test_unknown_policy_from_driver() {
        let err = FsError::from(DriverError::UnknownPolicyType("qiniu".into()));
        assert!(matches!(err, FsError::UnknownPolicyType(t) if t == "qiniu"));

        let err = FsError::from(DriverError::NotFound("a".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_partial_failure_message() {
        assert_eq!(
            FsError::PartialFailure { failed: 3 }.to_string(),
            "3 objects failed"
        );
    }
}
