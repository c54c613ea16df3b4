//! Folder repository.

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use stratus_core::model::{Folder, NewFolder};
use stratus_core::repository::{FolderRepository, RepoError};

use super::{db_error, now, to_utc};
use crate::entities::folders;

/// Folder repository backed by the `folders` table.
#[derive(Debug, Clone)]
pub struct DbFolderRepository {
    db: DatabaseConnection,
}

impl DbFolderRepository {
    /// Creates a new folder repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_folder(model: folders::Model) -> Folder {
    Folder {
        id: model.id,
        name: model.name,
        parent_id: model.parent_id,
        owner_id: model.owner_id,
        created_at: to_utc(model.created_at),
        updated_at: to_utc(model.updated_at),
    }
}

#[async_trait]
impl FolderRepository for DbFolderRepository {
    async fn create(&self, folder: NewFolder) -> Result<Folder, RepoError> {
        let now = now();
        let model = folders::ActiveModel {
            name: Set(folder.name),
            parent_id: Set(folder.parent_id),
            owner_id: Set(folder.owner_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        model.insert(&self.db).await.map(to_folder).map_err(db_error)
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Folder, RepoError> {
        folders::Entity::find_by_id(id)
            .filter(folders::Column::OwnerId.eq(user_id))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(to_folder)
            .ok_or_else(|| RepoError::not_found(format!("folder {id}")))
    }

    async fn find_by_ids(&self, ids: &[i64], user_id: i64) -> Result<Vec<Folder>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = folders::Entity::find()
            .filter(folders::Column::Id.is_in(ids.iter().copied()))
            .filter(folders::Column::OwnerId.eq(user_id))
            .order_by_asc(folders::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(to_folder).collect())
    }

    async fn find_root(&self, user_id: i64) -> Result<Option<Folder>, RepoError> {
        folders::Entity::find()
            .filter(folders::Column::OwnerId.eq(user_id))
            .filter(folders::Column::ParentId.is_null())
            .one(&self.db)
            .await
            .map(|row| row.map(to_folder))
            .map_err(db_error)
    }

    async fn find_child(
        &self,
        parent_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<Option<Folder>, RepoError> {
        folders::Entity::find()
            .filter(folders::Column::ParentId.eq(parent_id))
            .filter(folders::Column::OwnerId.eq(user_id))
            .filter(folders::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map(|row| row.map(to_folder))
            .map_err(db_error)
    }

    async fn list_children(&self, parent_ids: &[i64], user_id: i64) -> Result<Vec<Folder>, RepoError> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = folders::Entity::find()
            .filter(folders::Column::ParentId.is_in(parent_ids.iter().copied()))
            .filter(folders::Column::OwnerId.eq(user_id))
            .order_by_asc(folders::Column::Name)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(to_folder).collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        folders::Entity::delete_many()
            .filter(folders::Column::Id.is_in(ids.iter().copied()))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn rename(&self, id: i64, user_id: i64, name: &str) -> Result<(), RepoError> {
        let result = folders::Entity::update_many()
            .col_expr(folders::Column::Name, Expr::value(name))
            .col_expr(folders::Column::UpdatedAt, Expr::value(now()))
            .filter(folders::Column::Id.eq(id))
            .filter(folders::Column::OwnerId.eq(user_id))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            return Err(RepoError::not_found(format!("folder {id}")));
        }
        Ok(())
    }

    async fn move_to(&self, ids: &[i64], user_id: i64, parent_id: i64) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        folders::Entity::update_many()
            .col_expr(folders::Column::ParentId, Expr::value(parent_id))
            .col_expr(folders::Column::UpdatedAt, Expr::value(now()))
            .filter(folders::Column::Id.is_in(ids.iter().copied()))
            .filter(folders::Column::OwnerId.eq(user_id))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
