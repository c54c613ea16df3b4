//! Setting repository.

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use stratus_core::repository::{RepoError, SettingRepository};

use super::db_error;
use crate::entities::settings;

/// Setting repository backed by the `settings` table.
#[derive(Debug, Clone)]
pub struct DbSettingRepository {
    db: DatabaseConnection,
}

impl DbSettingRepository {
    /// Creates a new setting repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingRepository for DbSettingRepository {
    async fn get(&self, name: &str) -> Result<Option<String>, RepoError> {
        settings::Entity::find_by_id(name.to_string())
            .one(&self.db)
            .await
            .map(|row| row.map(|s| s.value))
            .map_err(db_error)
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), RepoError> {
        let model = settings::ActiveModel {
            name: Set(name.to_string()),
            value: Set(value.to_string()),
            setting_type: Set(String::new()),
        };
        settings::Entity::insert(model)
            .on_conflict(
                OnConflict::column(settings::Column::Name)
                    .update_column(settings::Column::Value)
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
