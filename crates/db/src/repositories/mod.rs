//! Repository implementations for data access.
//!
//! Each repository implements one `stratus-core` persistence trait over a
//! `SeaORM` connection. Sizes are stored as signed `BIGINT` and converted
//! at this boundary.

pub mod download;
pub mod file;
pub mod folder;
pub mod policy;
pub mod setting;
pub mod task;
pub mod user;

pub use download::DbDownloadRepository;
pub use file::DbFileRepository;
pub use folder::DbFolderRepository;
pub use policy::DbPolicyRepository;
pub use setting::DbSettingRepository;
pub use task::DbTaskRepository;
pub use user::DbUserRepository;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, DbErr, SqlErr};
use stratus_core::repository::{RepoError, Repositories};

/// Bundles every repository over one connection.
#[must_use]
pub fn repositories(db: &DatabaseConnection) -> Repositories {
    Repositories {
        users: Arc::new(DbUserRepository::new(db.clone())),
        policies: Arc::new(DbPolicyRepository::new(db.clone())),
        files: Arc::new(DbFileRepository::new(db.clone())),
        folders: Arc::new(DbFolderRepository::new(db.clone())),
        tasks: Arc::new(DbTaskRepository::new(db.clone())),
        downloads: Arc::new(DbDownloadRepository::new(db.clone())),
        settings: Arc::new(DbSettingRepository::new(db.clone())),
    }
}

/// Maps a `SeaORM` error, surfacing unique violations as `Conflict`.
pub(crate) fn db_error(err: DbErr) -> RepoError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => RepoError::conflict(msg),
        _ => RepoError::database(err.to_string()),
    }
}

pub(crate) fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn to_utc(value: DateTimeWithTimeZone) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

pub(crate) fn now() -> DateTimeWithTimeZone {
    Utc::now().into()
}
