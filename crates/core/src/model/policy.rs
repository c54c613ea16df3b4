//! Storage policies: where and how a user's bytes are stored.

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use super::random_string;
use crate::filesystem::path;

/// Backend family a policy's type tag selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyType {
    /// Local disk under the configured upload root.
    Local,
    /// Remote peer ("slave") server.
    Remote,
    /// S3-compatible object storage.
    S3,
    /// Azure Blob Storage.
    Azblob,
}

impl PolicyType {
    /// Parses a type tag; unknown tags yield `None`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            "s3" => Some(Self::S3),
            "azblob" => Some(Self::Azblob),
            _ => None,
        }
    }

    /// The stored type tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::S3 => "s3",
            Self::Azblob => "azblob",
        }
    }
}

/// Backend-specific options persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOptions {
    /// Allowed extensions, empty for any.
    #[serde(default)]
    pub file_type: Vec<String>,
    /// Content type forced on uploads, if any.
    #[serde(default, rename = "mimetype")]
    pub mime_type: String,
    /// Object storage region.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// Endpoint used for server-side requests; falls back to `server`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_side_endpoint: String,
}

/// A storage policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy ID.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Type tag selecting the driver.
    #[serde(rename = "type")]
    pub policy_type: String,
    /// Endpoint or peer URL.
    pub server: String,
    /// Bucket or container.
    pub bucket_name: String,
    /// Whether objects need signed access.
    pub is_private: bool,
    /// CDN base URL used to rewrite public links.
    pub base_url: String,
    /// Access key or account name.
    #[serde(skip_serializing)]
    pub access_key: String,
    /// Secret key; also signs peer requests for `remote`.
    #[serde(skip_serializing)]
    pub secret_key: String,
    /// Maximum single-file size in bytes, 0 for unlimited.
    pub max_size: u64,
    /// Whether stored names follow `file_name_rule`.
    pub auto_rename: bool,
    /// Template for the stored directory.
    pub dir_name_rule: String,
    /// Template for the stored file name.
    pub file_name_rule: String,
    /// Whether permanent source links may be handed out.
    pub is_origin_link_enable: bool,
    /// Backend-specific options.
    pub options: PolicyOptions,
}

impl Policy {
    /// Parsed type tag.
    #[must_use]
    pub fn kind(&self) -> Option<PolicyType> {
        PolicyType::parse(&self.policy_type)
    }

    /// Expands the directory rule for a virtual path.
    #[must_use]
    pub fn generate_path(&self, uid: i64, origin: &str) -> String {
        let mut table = time_placeholders(uid);
        table.push(("{path}", format!("{origin}/")));
        path::clean(&replace_placeholders(&self.dir_name_rule, &table))
    }

    /// Expands the file name rule, or returns `origin` when auto rename is off.
    #[must_use]
    pub fn generate_file_name(&self, uid: i64, origin: &str) -> String {
        if !self.auto_rename {
            return origin.to_string();
        }
        let mut table = time_placeholders(uid);
        table.push(("{originname}", origin.to_string()));
        replace_placeholders(&self.file_name_rule, &table)
    }

    /// Thumbnails for this policy are rendered by the server after upload.
    #[must_use]
    pub fn is_thumb_generate_needed(&self) -> bool {
        self.kind() == Some(PolicyType::Local)
    }

    /// Files can be served inline by this server without a redirect.
    #[must_use]
    pub fn is_directly_preview(&self) -> bool {
        self.kind() == Some(PolicyType::Local)
    }

    /// Physical directory structure can be browsed for import.
    #[must_use]
    pub fn can_structure_be_listed(&self) -> bool {
        !matches!(self.kind(), Some(PolicyType::Local | PolicyType::Remote))
    }
}

fn time_placeholders(uid: i64) -> Vec<(&'static str, String)> {
    let now = Local::now();
    let utc = Utc::now();
    vec![
        ("{randomkey16}", random_string(16)),
        ("{randomkey8}", random_string(8)),
        ("{timestamp}", utc.timestamp().to_string()),
        (
            "{timestamp_nano}",
            utc.timestamp_nanos_opt().unwrap_or_default().to_string(),
        ),
        ("{uid}", uid.to_string()),
        ("{datetime}", now.format("%Y%m%d%H%M%S").to_string()),
        ("{date}", now.format("%Y%m%d").to_string()),
        ("{year}", now.format("%Y").to_string()),
        ("{month}", now.format("%m").to_string()),
        ("{day}", now.format("%d").to_string()),
        ("{hour}", now.format("%H").to_string()),
        ("{minute}", now.format("%M").to_string()),
        ("{second}", now.format("%S").to_string()),
    ]
}

fn replace_placeholders(rule: &str, table: &[(&str, String)]) -> String {
    table
        .iter()
        .fold(rule.to_string(), |acc, (key, value)| acc.replace(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_generate_path_expands_uid_and_path() {
        let mut policy = fixtures::local_policy(1);
        policy.dir_name_rule = "uploads/{uid}/{path}".to_string();
        assert_eq!(policy.generate_path(7, "/docs/work"), "uploads/7/docs/work");
        assert_eq!(policy.generate_path(7, "/"), "uploads/7");
    }

    #[test]
    fn test_generate_path_random_key_length() {
        let mut policy = fixtures::local_policy(1);
        policy.dir_name_rule = "{randomkey8}".to_string();
        assert_eq!(policy.generate_path(1, "/").len(), 8);
    }

    #[test]
    fn test_generate_file_name_without_auto_rename() {
        let mut policy = fixtures::local_policy(1);
        policy.auto_rename = false;
        policy.file_name_rule = "{randomkey16}".to_string();
        assert_eq!(policy.generate_file_name(1, "a.txt"), "a.txt");
    }

    #[test]
    fn test_generate_file_name_with_auto_rename() {
        let mut policy = fixtures::local_policy(1);
        policy.auto_rename = true;
        policy.file_name_rule = "{uid}_{originname}".to_string();
        assert_eq!(policy.generate_file_name(3, "a.txt"), "3_a.txt");
    }

    #[test]
    fn test_policy_capabilities() {
        let local = fixtures::local_policy(1);
        assert!(local.is_thumb_generate_needed());
        assert!(!local.can_structure_be_listed());

        let mut s3 = fixtures::local_policy(2);
        s3.policy_type = "s3".to_string();
        assert!(!s3.is_thumb_generate_needed());
        assert!(s3.can_structure_be_listed());

        s3.policy_type = "ftp".to_string();
        assert_eq!(s3.kind(), None);
    }
}
