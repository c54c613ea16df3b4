//! Core logic for Stratus.
//!
//! This crate contains the storage abstraction and everything built on it, with
//! ZERO web or database dependencies. Persistence is reached through the traits
//! in [`repository`], which the db crate implements.
//!
//! # Modules
//!
//! - `model` - Users, groups, policies, files, folders, tasks and downloads
//! - `repository` - Persistence traits and the `Repositories` bundle
//! - `quota` - Guarded storage reservation and refund
//! - `cache` - Key/value cache with per-entry TTL
//! - `setting` - Runtime tunables backed by persisted settings
//! - `auth` - HMAC signing for URLs and peer requests
//! - `driver` - Storage handlers (local, object store, remote peer) and dispatch
//! - `filesystem` - Virtual file system facade and its hook pipeline
//! - `task` - Background jobs and the worker pool
//! - `aria2` - Offline download client, notifier and monitors

pub mod aria2;
pub mod auth;
pub mod cache;
pub mod driver;
pub mod filesystem;
pub mod model;
pub mod quota;
pub mod repository;
pub mod setting;
pub mod task;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
