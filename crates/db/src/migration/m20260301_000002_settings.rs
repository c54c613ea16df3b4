//! Settings migration.
//!
//! Creates the settings table and inserts the runtime tunables with their
//! defaults.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(SETTINGS_SQL).await?;
        db.execute_unprepared(DEFAULTS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared("DROP TABLE IF EXISTS settings CASCADE;")
            .await?;
        Ok(())
    }
}

const SETTINGS_SQL: &str = r"
CREATE TABLE settings (
    name VARCHAR(255) PRIMARY KEY,
    value TEXT NOT NULL DEFAULT '',
    type VARCHAR(64) NOT NULL DEFAULT ''
);
";

const DEFAULTS_SQL: &str = r"
INSERT INTO settings (name, value, type) VALUES
    ('max_worker_num', '10', 'task'),
    ('max_parallel_transfer', '4', 'task'),
    ('aria2_interval', '10', 'aria2'),
    ('aria2_call_timeout', '5', 'aria2'),
    ('aria2_rpcurl', '', 'aria2'),
    ('aria2_token', '', 'aria2'),
    ('aria2_options', '{}', 'aria2'),
    ('aria2_temp_path', '', 'aria2'),
    ('upload_credential_timeout', '3600', 'timeout'),
    ('upload_session_timeout', '86400', 'timeout'),
    ('slave_api_timeout', '60', 'timeout'),
    ('preview_timeout', '60', 'timeout'),
    ('thumb_width', '400', 'thumb'),
    ('thumb_height', '300', 'thumb')
ON CONFLICT (name) DO NOTHING;
";
