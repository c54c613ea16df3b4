//! Offline download repository.

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use stratus_core::model::{Download, DownloadStatus, DownloadType, NewDownload};
use stratus_core::repository::{DownloadRepository, RepoError};

use super::{db_error, now, to_i64, to_u64, to_utc};
use crate::entities::downloads;

/// Download repository backed by the `downloads` table.
#[derive(Debug, Clone)]
pub struct DbDownloadRepository {
    db: DatabaseConnection,
}

impl DbDownloadRepository {
    /// Creates a new download repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_download(model: downloads::Model) -> Download {
    Download {
        id: model.id,
        status: DownloadStatus::from_i16(model.status),
        download_type: DownloadType::from_i16(model.download_type),
        source: model.source,
        total_size: to_u64(model.total_size),
        downloaded_size: to_u64(model.downloaded_size),
        gid: model.gid,
        speed: to_u64(model.speed),
        parent: model.parent,
        attrs: model.attrs,
        error: model.error,
        dst: model.dst,
        user_id: model.user_id,
        task_id: model.task_id,
        created_at: to_utc(model.created_at),
        updated_at: to_utc(model.updated_at),
    }
}

#[async_trait]
impl DownloadRepository for DbDownloadRepository {
    async fn create(&self, download: NewDownload) -> Result<Download, RepoError> {
        let now = now();
        let model = downloads::ActiveModel {
            status: Set(DownloadStatus::Ready as i16),
            download_type: Set(download.download_type as i16),
            source: Set(download.source),
            total_size: Set(0),
            downloaded_size: Set(0),
            gid: Set(download.gid),
            speed: Set(0),
            parent: Set(download.parent),
            attrs: Set(String::new()),
            error: Set(String::new()),
            dst: Set(download.dst),
            user_id: Set(download.user_id),
            task_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        model.insert(&self.db).await.map(to_download).map_err(db_error)
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Download, RepoError> {
        downloads::Entity::find_by_id(id)
            .filter(downloads::Column::UserId.eq(user_id))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(to_download)
            .ok_or_else(|| RepoError::not_found(format!("download {id}")))
    }

    async fn save(&self, download: &Download) -> Result<(), RepoError> {
        let model = downloads::ActiveModel {
            id: Set(download.id),
            status: Set(download.status as i16),
            total_size: Set(to_i64(download.total_size)),
            downloaded_size: Set(to_i64(download.downloaded_size)),
            gid: Set(download.gid.clone()),
            speed: Set(to_i64(download.speed)),
            parent: Set(download.parent.clone()),
            attrs: Set(download.attrs.clone()),
            error: Set(download.error.clone()),
            task_id: Set(download.task_id),
            updated_at: Set(now()),
            ..Default::default()
        };
        match model.update(&self.db).await {
            Ok(_) => Ok(()),
            Err(DbErr::RecordNotUpdated) => Err(RepoError::not_found(format!("download {}", download.id))),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<Download>, RepoError> {
        let rows = downloads::Entity::find()
            .filter(downloads::Column::Status.is_in(statuses.iter().map(|s| *s as i16)))
            .order_by_asc(downloads::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(to_download).collect())
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Download>, u64), RepoError> {
        let query = downloads::Entity::find().filter(downloads::Column::UserId.eq(user_id));
        let total = query.clone().count(&self.db).await.map_err(db_error)?;
        let rows = query
            .order_by_desc(downloads::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        Ok((rows.into_iter().map(to_download).collect(), total))
    }
}
