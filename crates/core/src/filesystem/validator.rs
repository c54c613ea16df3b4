//! Name, size and extension checks.

use super::context::FileHeader;
use super::{FileSystem, FsError};

/// Characters never allowed in object names.
const RESERVED_CHARACTERS: [char; 9] = ['\\', '?', '*', '<', '"', ':', '>', '/', '|'];

/// Names must be shorter than this many bytes.
const MAX_NAME_LEN: usize = 256;

/// Whether `name` is a legal object name.
#[must_use]
pub fn is_legal_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() < MAX_NAME_LEN
        && !name.ends_with(' ')
        && !name.contains(RESERVED_CHARACTERS)
}

/// Whether the extension of `name` appears in `extensions`, ignoring case.
/// Names without an extension never match.
#[must_use]
pub fn is_in_extension_list(extensions: &[String], name: &str) -> bool {
    let Some(ext) = extension(name) else {
        return false;
    };
    extensions.iter().any(|allowed| allowed.to_lowercase() == ext)
}

fn extension(name: &str) -> Option<String> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let idx = file_name.rfind('.')?;
    let ext = &file_name[idx + 1..];
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

impl FileSystem {
    /// Checks size, name and extension against the active policy.
    pub fn validate_file(&self, header: &FileHeader) -> Result<(), FsError> {
        if !self.validate_file_size(header.size) {
            return Err(FsError::FileSizeTooBig);
        }
        if !is_legal_name(&header.name) {
            return Err(FsError::IllegalObjectName);
        }
        if !self.validate_extension(&header.name) {
            return Err(FsError::FileExtensionNotAllowed);
        }
        Ok(())
    }

    /// Whether `size` fits the policy's single-file limit.
    #[must_use]
    pub fn validate_file_size(&self, size: u64) -> bool {
        self.policy.max_size == 0 || size <= self.policy.max_size
    }

    /// Whether the policy's allow-list admits `name`.
    #[must_use]
    pub fn validate_extension(&self, name: &str) -> bool {
        let allowed = &self.policy.options.file_type;
        allowed.is_empty() || is_in_extension_list(allowed, name)
    }
}
