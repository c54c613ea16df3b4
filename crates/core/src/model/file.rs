//! File and folder records of the virtual tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file in a user's virtual tree.
///
/// Several rows may point at the same `(policy_id, source_name)` after a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// File ID.
    pub id: i64,
    /// Display name, unique within its folder.
    pub name: String,
    /// Physical key in the policy's backend.
    pub source_name: String,
    /// Owner.
    pub user_id: i64,
    /// Size in bytes.
    pub size: u64,
    /// `"w,h"` for images with a thumbnail, empty otherwise.
    pub pic_info: String,
    /// Containing folder.
    pub folder_id: i64,
    /// Policy holding the bytes.
    pub policy_id: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a file row.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Display name.
    pub name: String,
    /// Physical key.
    pub source_name: String,
    /// Owner.
    pub user_id: i64,
    /// Size in bytes.
    pub size: u64,
    /// Image dimensions, if known.
    pub pic_info: String,
    /// Containing folder.
    pub folder_id: i64,
    /// Policy holding the bytes.
    pub policy_id: i64,
}

/// A folder in a user's virtual tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Folder ID.
    pub id: i64,
    /// Name, `/` for the root.
    pub name: String,
    /// Parent folder, `None` for the root.
    pub parent_id: Option<i64>,
    /// Owner.
    pub owner_id: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Folder {
    /// Whether this is the user's root folder.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Input for inserting a folder row.
#[derive(Debug, Clone)]
pub struct NewFolder {
    /// Name.
    pub name: String,
    /// Parent folder.
    pub parent_id: Option<i64>,
    /// Owner.
    pub owner_id: i64,
}
