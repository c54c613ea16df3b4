//! User repository, including the guarded capacity updates.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, Statement};
use stratus_core::model::{Group, User, UserStatus};
use stratus_core::repository::{RepoError, UserRepository};

use super::policy::to_policy;
use super::{db_error, to_i64, to_u64};
use crate::entities::{groups, policies, users};

/// Adds to `storage` only while the result stays within the group's cap.
/// One statement, so concurrent reservations cannot over-commit.
const INCREASE_SQL: &str = r"
UPDATE users SET storage = storage + $1, updated_at = now()
WHERE id = $2
  AND storage + $1 <= (SELECT max_storage FROM groups WHERE groups.id = users.group_id)
";

const INCREASE_UNCHECKED_SQL: &str = r"
UPDATE users SET storage = storage + $1, updated_at = now() WHERE id = $2
";

const DEDUCT_SQL: &str = r"
UPDATE users u SET storage = GREATEST(u.storage - $1, 0), updated_at = now()
FROM (SELECT id, storage FROM users WHERE id = $2 FOR UPDATE) prev
WHERE u.id = prev.id
RETURNING prev.storage >= $1 AS full
";

/// User repository backed by the `users` and `groups` tables.
#[derive(Debug, Clone)]
pub struct DbUserRepository {
    db: DatabaseConnection,
}

impl DbUserRepository {
    /// Creates a new user repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn statement(sql: &str, size: u64, user_id: i64) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, [to_i64(size).into(), user_id.into()])
    }
}

/// Parses the JSON policy list of a group. Garbage reads as empty.
pub(crate) fn policy_list(raw: &str) -> Vec<i64> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError> {
        let (user, group) = users::Entity::find_by_id(id)
            .find_also_related(groups::Entity)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| RepoError::not_found(format!("user {id}")))?;
        let group = group.ok_or_else(|| RepoError::not_found(format!("group of user {id}")))?;

        let policy_ids = policy_list(&group.policies);
        let policy_id = *policy_ids
            .first()
            .ok_or_else(|| RepoError::not_found(format!("policy of group {}", group.id)))?;
        let policy = policies::Entity::find_by_id(policy_id)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| RepoError::not_found(format!("policy {policy_id}")))?;

        Ok(User {
            id: user.id,
            email: user.email,
            nick: user.nick,
            status: UserStatus::from_i16(user.status),
            group_id: user.group_id,
            storage: to_u64(user.storage),
            group: Group {
                id: group.id,
                name: group.name,
                max_storage: to_u64(group.max_storage),
                policy_list: policy_ids,
                speed_limit: group.speed_limit,
            },
            policy: to_policy(policy),
        })
    }

    async fn increase_storage(&self, user_id: i64, size: u64) -> Result<bool, RepoError> {
        if size == 0 {
            return Ok(true);
        }
        let result = self
            .db
            .execute(Self::statement(INCREASE_SQL, size, user_id))
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn increase_storage_without_check(&self, user_id: i64, size: u64) -> Result<(), RepoError> {
        if size == 0 {
            return Ok(());
        }
        self.db
            .execute(Self::statement(INCREASE_UNCHECKED_SQL, size, user_id))
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn deduct_storage(&self, user_id: i64, size: u64) -> Result<bool, RepoError> {
        if size == 0 {
            return Ok(true);
        }
        let row = self
            .db
            .query_one(Self::statement(DEDUCT_SQL, size, user_id))
            .await
            .map_err(db_error)?
            .ok_or_else(|| RepoError::not_found(format!("user {user_id}")))?;
        row.try_get::<bool>("", "full").map_err(db_error)
    }
}
