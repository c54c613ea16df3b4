//! Task repository.

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use stratus_core::model::{NewTask, Task, TaskStatus};
use stratus_core::repository::{RepoError, TaskRepository};

use super::{db_error, now, to_utc};
use crate::entities::tasks;

/// Task repository backed by the `tasks` table.
#[derive(Debug, Clone)]
pub struct DbTaskRepository {
    db: DatabaseConnection,
}

impl DbTaskRepository {
    /// Creates a new task repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn update_column(
        &self,
        id: i64,
        column: tasks::Column,
        value: sea_orm::Value,
    ) -> Result<(), RepoError> {
        let result = tasks::Entity::update_many()
            .col_expr(column, Expr::value(value))
            .col_expr(tasks::Column::UpdatedAt, Expr::value(now()))
            .filter(tasks::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        if result.rows_affected == 0 {
            return Err(RepoError::not_found(format!("task {id}")));
        }
        Ok(())
    }
}

fn to_task(model: tasks::Model) -> Result<Task, RepoError> {
    let status = TaskStatus::from_i16(model.status).ok_or_else(|| {
        RepoError::database(format!("task {} has unknown status {}", model.id, model.status))
    })?;
    Ok(Task {
        id: model.id,
        status,
        task_type: model.task_type,
        user_id: model.user_id,
        progress: model.progress,
        error: model.error,
        props: model.props,
        created_at: to_utc(model.created_at),
        updated_at: to_utc(model.updated_at),
    })
}

#[async_trait]
impl TaskRepository for DbTaskRepository {
    async fn create(&self, task: NewTask) -> Result<Task, RepoError> {
        let now = now();
        let model = tasks::ActiveModel {
            status: Set(TaskStatus::Queued as i16),
            task_type: Set(task.task_type),
            user_id: Set(task.user_id),
            progress: Set(0),
            error: Set(None),
            props: Set(task.props),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        to_task(model.insert(&self.db).await.map_err(db_error)?)
    }

    async fn find_by_id(&self, id: i64) -> Result<Task, RepoError> {
        let model = tasks::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| RepoError::not_found(format!("task {id}")))?;
        to_task(model)
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), RepoError> {
        self.update_column(id, tasks::Column::Status, (status as i16).into())
            .await
    }

    async fn update_progress(&self, id: i64, progress: i64) -> Result<(), RepoError> {
        self.update_column(id, tasks::Column::Progress, progress.into())
            .await
    }

    async fn update_error(&self, id: i64, error: &str) -> Result<(), RepoError> {
        self.update_column(id, tasks::Column::Error, Some(error.to_string()).into())
            .await
    }

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, RepoError> {
        let rows = tasks::Entity::find()
            .filter(tasks::Column::Status.is_in(statuses.iter().map(|s| *s as i16)))
            .order_by_asc(tasks::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(to_task).collect()
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Task>, u64), RepoError> {
        let query = tasks::Entity::find().filter(tasks::Column::UserId.eq(user_id));
        let total = query.clone().count(&self.db).await.map_err(db_error)?;
        let rows = query
            .order_by_desc(tasks::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(db_error)?;
        let page = rows.into_iter().map(to_task).collect::<Result<Vec<_>, _>>()?;
        Ok((page, total))
    }
}
