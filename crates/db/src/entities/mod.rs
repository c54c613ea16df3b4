//! `SeaORM` entities, one module per table.

pub mod downloads;
pub mod files;
pub mod folders;
pub mod groups;
pub mod policies;
pub mod settings;
pub mod tasks;
pub mod users;
