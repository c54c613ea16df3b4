//! Domain types shared by the file system, jobs and offline downloads.
//!
//! Sizes are `u64` bytes throughout. The db crate converts to and from its
//! signed column types at the boundary.

mod download;
mod file;
mod policy;
mod task;
mod user;

pub use download::{Download, DownloadStatus, DownloadType, NewDownload};
pub use file::{File, Folder, NewFile, NewFolder};
pub use policy::{Policy, PolicyOptions, PolicyType};
pub use task::{NewTask, Task, TaskStatus};
pub use user::{Group, User, UserStatus};

use rand::Rng;
use rand::distr::Alphanumeric;

/// Returns `n` random alphanumeric characters.
#[must_use]
pub fn random_string(n: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}
