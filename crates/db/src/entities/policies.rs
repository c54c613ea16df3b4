//! `SeaORM` Entity for policies table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "policies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[sea_orm(column_name = "type")]
    pub policy_type: String,
    pub server: String,
    pub bucket_name: String,
    pub is_private: bool,
    pub base_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub max_size: i64,
    pub auto_rename: bool,
    pub dir_name_rule: String,
    pub file_name_rule: String,
    pub is_origin_link_enable: bool,
    /// JSON-encoded `PolicyOptions`.
    pub options: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
