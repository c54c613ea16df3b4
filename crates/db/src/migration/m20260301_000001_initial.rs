//! Initial database migration.
//!
//! Creates the account, storage, task and download tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ACCOUNTS
        // ============================================================
        db.execute_unprepared(POLICIES_SQL).await?;
        db.execute_unprepared(GROUPS_SQL).await?;
        db.execute_unprepared(USERS_SQL).await?;

        // ============================================================
        // PART 2: VIRTUAL FILE SYSTEM
        // ============================================================
        db.execute_unprepared(FOLDERS_SQL).await?;
        db.execute_unprepared(FILES_SQL).await?;

        // ============================================================
        // PART 3: BACKGROUND WORK
        // ============================================================
        db.execute_unprepared(TASKS_SQL).await?;
        db.execute_unprepared(DOWNLOADS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_SQL).await?;
        Ok(())
    }
}

const POLICIES_SQL: &str = r"
CREATE TABLE policies (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    type VARCHAR(32) NOT NULL,
    server TEXT NOT NULL DEFAULT '',
    bucket_name VARCHAR(255) NOT NULL DEFAULT '',
    is_private BOOLEAN NOT NULL DEFAULT TRUE,
    base_url TEXT NOT NULL DEFAULT '',
    access_key TEXT NOT NULL DEFAULT '',
    secret_key TEXT NOT NULL DEFAULT '',
    max_size BIGINT NOT NULL DEFAULT 0,
    auto_rename BOOLEAN NOT NULL DEFAULT FALSE,
    dir_name_rule TEXT NOT NULL DEFAULT 'uploads/{uid}/{path}',
    file_name_rule TEXT NOT NULL DEFAULT '{randomkey8}_{originname}',
    is_origin_link_enable BOOLEAN NOT NULL DEFAULT FALSE,
    options TEXT NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_max_size CHECK (max_size >= 0)
);
";

const GROUPS_SQL: &str = r"
CREATE TABLE groups (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    max_storage BIGINT NOT NULL DEFAULT 0,
    policies TEXT NOT NULL DEFAULT '[]',
    speed_limit BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_max_storage CHECK (max_storage >= 0)
);
";

const USERS_SQL: &str = r"
CREATE TABLE users (
    id BIGSERIAL PRIMARY KEY,
    email VARCHAR(255) NOT NULL UNIQUE,
    nick VARCHAR(255) NOT NULL DEFAULT '',
    status SMALLINT NOT NULL DEFAULT 0,
    group_id BIGINT NOT NULL REFERENCES groups(id),
    storage BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_storage CHECK (storage >= 0)
);

CREATE INDEX idx_users_group ON users(group_id);
";

const FOLDERS_SQL: &str = r"
CREATE TABLE folders (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    parent_id BIGINT REFERENCES folders(id) ON DELETE CASCADE,
    owner_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_folders_parent_name UNIQUE (parent_id, name)
);

-- One root per owner
CREATE UNIQUE INDEX uq_folders_root ON folders(owner_id) WHERE parent_id IS NULL;

CREATE INDEX idx_folders_owner ON folders(owner_id);
";

const FILES_SQL: &str = r"
CREATE TABLE files (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    source_name TEXT NOT NULL,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    size BIGINT NOT NULL DEFAULT 0,
    pic_info VARCHAR(255) NOT NULL DEFAULT '',
    folder_id BIGINT NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    policy_id BIGINT NOT NULL REFERENCES policies(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_files_folder_name UNIQUE (user_id, folder_id, name),
    CONSTRAINT chk_size CHECK (size >= 0)
);

-- Soft-link lookups before physical deletion
CREATE INDEX idx_files_source ON files(policy_id, source_name);

CREATE INDEX idx_files_folder ON files(folder_id);
";

const TASKS_SQL: &str = r"
CREATE TABLE tasks (
    id BIGSERIAL PRIMARY KEY,
    status SMALLINT NOT NULL DEFAULT 0,
    type SMALLINT NOT NULL,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    progress BIGINT NOT NULL DEFAULT 0,
    error TEXT,
    props TEXT NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Resume scan on start
CREATE INDEX idx_tasks_status ON tasks(status) WHERE status IN (0, 1);

CREATE INDEX idx_tasks_user ON tasks(user_id, id DESC);
";

const DOWNLOADS_SQL: &str = r"
CREATE TABLE downloads (
    id BIGSERIAL PRIMARY KEY,
    status SMALLINT NOT NULL DEFAULT 0,
    type SMALLINT NOT NULL DEFAULT 0,
    source TEXT NOT NULL,
    total_size BIGINT NOT NULL DEFAULT 0,
    downloaded_size BIGINT NOT NULL DEFAULT 0,
    gid VARCHAR(64) NOT NULL DEFAULT '',
    speed BIGINT NOT NULL DEFAULT 0,
    parent TEXT NOT NULL DEFAULT '',
    attrs TEXT NOT NULL DEFAULT '',
    error TEXT NOT NULL DEFAULT '',
    dst TEXT NOT NULL,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    task_id BIGINT REFERENCES tasks(id) ON DELETE SET NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Monitor resume scan on start
CREATE INDEX idx_downloads_status ON downloads(status) WHERE status IN (0, 1, 2);

CREATE INDEX idx_downloads_user ON downloads(user_id, id DESC);
";

const DROP_SQL: &str = r"
DROP TABLE IF EXISTS downloads CASCADE;
DROP TABLE IF EXISTS tasks CASCADE;
DROP TABLE IF EXISTS files CASCADE;
DROP TABLE IF EXISTS folders CASCADE;
DROP TABLE IF EXISTS users CASCADE;
DROP TABLE IF EXISTS groups CASCADE;
DROP TABLE IF EXISTS policies CASCADE;
";
