//! Offline downloads driven by an aria2 daemon.
//!
//! [`Aria2Service`] owns the active [`Aria2Client`] and can swap it when the
//! RPC settings change. Every download row gets one [`Monitor`] task that
//! mirrors the daemon's view of the job into the row, re-validates quota
//! once the size is known, and hands finished files to a transfer job.
//!
//! Monitors wake on a timer and on push events. The daemon's events enter
//! through [`Notifier`], which routes them to the monitor subscribed to the
//! event's gid.

mod client;
mod monitor;
mod notifier;
mod service;

pub use client::{Aria2Client, DisabledClient, Event, FileInfo, RpcClient, StatusInfo};
pub use monitor::{MAX_RETRY, Monitor};
pub use notifier::{Notifier, StatusEvent};
pub use service::Aria2Service;

#[cfg(test)]
pub use client::MockAria2Client;

use thiserror::Error;

use crate::filesystem::FsError;
use crate::repository::RepoError;
use crate::task::TaskError;

/// Offline download errors.
#[derive(Debug, Error)]
pub enum Aria2Error {
    /// No daemon is configured.
    #[error("offline download is not enabled")]
    NotEnabled,

    /// The RPC settings are unusable.
    #[error("invalid aria2 configuration: {0}")]
    Config(String),

    /// The request did not reach the daemon or timed out.
    #[error("aria2 rpc transport error: {0}")]
    Transport(String),

    /// The daemon rejected the call.
    #[error("aria2 rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Daemon message.
        message: String,
    },

    /// The daemon's answer could not be decoded.
    #[error("invalid aria2 response: {0}")]
    Decode(String),

    /// The destination folder does not exist.
    #[error("destination folder does not exist")]
    DstNotExist,

    /// Persisting the download row failed.
    #[error(transparent)]
    Persistence(#[from] RepoError),

    /// The follow-up transfer job could not be created.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Validation against the owner's policy failed.
    #[error(transparent)]
    Fs(#[from] FsError),
}

impl From<reqwest::Error> for Aria2Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
