//! Offline download rows mirrored from the download daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Download state as last reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum DownloadStatus {
    /// Queued in the daemon.
    Ready = 0,
    /// Transferring.
    Downloading = 1,
    /// Paused.
    Paused = 2,
    /// Failed.
    Error = 3,
    /// Finished downloading.
    Complete = 4,
    /// Removed.
    Canceled = 5,
    /// Unrecognized daemon state.
    Unknown = 6,
}

impl DownloadStatus {
    /// Maps a stored integer to a status.
    #[must_use]
    pub const fn from_i16(value: i16) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Downloading,
            2 => Self::Paused,
            3 => Self::Error,
            4 => Self::Complete,
            5 => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    /// Maps an aria2 `status` string.
    #[must_use]
    pub fn from_aria2(status: &str) -> Self {
        match status {
            "complete" => Self::Complete,
            "active" => Self::Downloading,
            "waiting" => Self::Ready,
            "paused" => Self::Paused,
            "error" => Self::Error,
            "removed" => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    /// States for which a monitor should be running.
    pub const ACTIVE: [Self; 3] = [Self::Ready, Self::Downloading, Self::Paused];
}

/// Kind of offline download source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum DownloadType {
    /// HTTP/FTP/magnet URL.
    Url = 0,
    /// Torrent file.
    Torrent = 1,
}

impl DownloadType {
    /// Maps a stored integer to a type.
    #[must_use]
    pub const fn from_i16(value: i16) -> Self {
        match value {
            1 => Self::Torrent,
            _ => Self::Url,
        }
    }
}

/// An offline download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    /// Download ID.
    pub id: i64,
    /// Current status.
    pub status: DownloadStatus,
    /// Source kind.
    #[serde(rename = "type")]
    pub download_type: DownloadType,
    /// URL or torrent reference.
    pub source: String,
    /// Total bytes, once known.
    pub total_size: u64,
    /// Bytes downloaded so far.
    pub downloaded_size: u64,
    /// Daemon job identifier.
    pub gid: String,
    /// Bytes per second.
    pub speed: u64,
    /// Local staging directory.
    pub parent: String,
    /// Raw daemon status JSON.
    pub attrs: String,
    /// Failure message.
    pub error: String,
    /// Destination virtual directory.
    pub dst: String,
    /// Owner.
    pub user_id: i64,
    /// Transfer task spawned on completion.
    pub task_id: Option<i64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a download row.
#[derive(Debug, Clone)]
pub struct NewDownload {
    /// Source kind.
    pub download_type: DownloadType,
    /// URL or torrent reference.
    pub source: String,
    /// Daemon job identifier.
    pub gid: String,
    /// Local staging directory.
    pub parent: String,
    /// Destination virtual directory.
    pub dst: String,
    /// Owner.
    pub user_id: i64,
}
