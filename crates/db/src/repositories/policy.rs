//! Policy repository.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use stratus_core::model::{Policy, PolicyOptions};
use stratus_core::repository::{PolicyRepository, RepoError};

use super::{db_error, to_u64};
use crate::entities::policies;

/// Policy repository backed by the `policies` table.
#[derive(Debug, Clone)]
pub struct DbPolicyRepository {
    db: DatabaseConnection,
}

impl DbPolicyRepository {
    /// Creates a new policy repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

pub(crate) fn to_policy(model: policies::Model) -> Policy {
    let options = serde_json::from_str::<PolicyOptions>(&model.options).unwrap_or_else(|e| {
        tracing::warn!(policy_id = model.id, error = %e, "invalid policy options, using defaults");
        PolicyOptions::default()
    });
    Policy {
        id: model.id,
        name: model.name,
        policy_type: model.policy_type,
        server: model.server,
        bucket_name: model.bucket_name,
        is_private: model.is_private,
        base_url: model.base_url,
        access_key: model.access_key,
        secret_key: model.secret_key,
        max_size: to_u64(model.max_size),
        auto_rename: model.auto_rename,
        dir_name_rule: model.dir_name_rule,
        file_name_rule: model.file_name_rule,
        is_origin_link_enable: model.is_origin_link_enable,
        options,
    }
}

#[async_trait]
impl PolicyRepository for DbPolicyRepository {
    async fn find_by_id(&self, id: i64) -> Result<Policy, RepoError> {
        policies::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(to_policy)
            .ok_or_else(|| RepoError::not_found(format!("policy {id}")))
    }
}
