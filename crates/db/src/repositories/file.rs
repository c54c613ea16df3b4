//! File repository.

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use stratus_core::model::{File, NewFile};
use stratus_core::repository::{FileRepository, RepoError};

use super::{db_error, now, to_i64, to_u64, to_utc};
use crate::entities::files;

/// File repository backed by the `files` table.
#[derive(Debug, Clone)]
pub struct DbFileRepository {
    db: DatabaseConnection,
}

impl DbFileRepository {
    /// Creates a new file repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn update_column(
        &self,
        id: i64,
        column: files::Column,
        value: sea_orm::Value,
    ) -> Result<(), RepoError> {
        let result = files::Entity::update_many()
            .col_expr(column, Expr::value(value))
            .col_expr(files::Column::UpdatedAt, Expr::value(now()))
            .filter(files::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            return Err(RepoError::not_found(format!("file {id}")));
        }
        Ok(())
    }
}

fn to_file(model: files::Model) -> File {
    File {
        id: model.id,
        name: model.name,
        source_name: model.source_name,
        user_id: model.user_id,
        size: to_u64(model.size),
        pic_info: model.pic_info,
        folder_id: model.folder_id,
        policy_id: model.policy_id,
        created_at: to_utc(model.created_at),
        updated_at: to_utc(model.updated_at),
    }
}

#[async_trait]
impl FileRepository for DbFileRepository {
    async fn create(&self, file: NewFile) -> Result<File, RepoError> {
        let now = now();
        let model = files::ActiveModel {
            name: Set(file.name),
            source_name: Set(file.source_name),
            user_id: Set(file.user_id),
            size: Set(to_i64(file.size)),
            pic_info: Set(file.pic_info),
            folder_id: Set(file.folder_id),
            policy_id: Set(file.policy_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        model.insert(&self.db).await.map(to_file).map_err(db_error)
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<File, RepoError> {
        files::Entity::find_by_id(id)
            .filter(files::Column::UserId.eq(user_id))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(to_file)
            .ok_or_else(|| RepoError::not_found(format!("file {id}")))
    }

    async fn find_by_ids(&self, ids: &[i64], user_id: i64) -> Result<Vec<File>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = files::Entity::find()
            .filter(files::Column::Id.is_in(ids.iter().copied()))
            .filter(files::Column::UserId.eq(user_id))
            .order_by_asc(files::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(to_file).collect())
    }

    async fn find_by_folders(&self, folder_ids: &[i64], user_id: i64) -> Result<Vec<File>, RepoError> {
        if folder_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = files::Entity::find()
            .filter(files::Column::FolderId.is_in(folder_ids.iter().copied()))
            .filter(files::Column::UserId.eq(user_id))
            .order_by_asc(files::Column::Name)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(to_file).collect())
    }

    async fn find_by_name(
        &self,
        folder_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<Option<File>, RepoError> {
        files::Entity::find()
            .filter(files::Column::FolderId.eq(folder_id))
            .filter(files::Column::UserId.eq(user_id))
            .filter(files::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map(|row| row.map(to_file))
            .map_err(db_error)
    }

    async fn find_by_sources(&self, policy_id: i64, source_names: &[String]) -> Result<Vec<File>, RepoError> {
        if source_names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = files::Entity::find()
            .filter(files::Column::PolicyId.eq(policy_id))
            .filter(files::Column::SourceName.is_in(source_names.iter().cloned()))
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(to_file).collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        files::Entity::delete_many()
            .filter(files::Column::Id.is_in(ids.iter().copied()))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn update_size(&self, id: i64, size: u64) -> Result<(), RepoError> {
        self.update_column(id, files::Column::Size, to_i64(size).into()).await
    }

    async fn update_source_name(&self, id: i64, source_name: &str) -> Result<(), RepoError> {
        self.update_column(id, files::Column::SourceName, source_name.into()).await
    }

    async fn update_pic_info(&self, id: i64, pic_info: &str) -> Result<(), RepoError> {
        self.update_column(id, files::Column::PicInfo, pic_info.into()).await
    }

    async fn rename(&self, id: i64, user_id: i64, name: &str) -> Result<(), RepoError> {
        let result = files::Entity::update_many()
            .col_expr(files::Column::Name, Expr::value(name))
            .col_expr(files::Column::UpdatedAt, Expr::value(now()))
            .filter(files::Column::Id.eq(id))
            .filter(files::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            return Err(RepoError::not_found(format!("file {id}")));
        }
        Ok(())
    }

    async fn move_to(&self, ids: &[i64], user_id: i64, folder_id: i64) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        files::Entity::update_many()
            .col_expr(files::Column::FolderId, Expr::value(folder_id))
            .col_expr(files::Column::UpdatedAt, Expr::value(now()))
            .filter(files::Column::Id.is_in(ids.iter().copied()))
            .filter(files::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
