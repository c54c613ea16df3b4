//! Database seeder for Stratus development and testing.
//!
//! Seeds a default group, a local storage policy, an admin user with a root
//! folder, and the scratch path used by offline downloads. Existing rows are
//! left untouched, so the seeder can be run repeatedly.
//!
//! Usage: cargo run --bin seeder

use anyhow::Context;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use stratus_core::model::{PolicyOptions, UserStatus};
use stratus_core::repository::SettingRepository;
use stratus_db::DbSettingRepository;
use stratus_db::entities::{folders, groups, policies, users};
use stratus_shared::{AppConfig, JwtConfig, JwtService};

const DEFAULT_GROUP: &str = "Default";
const DEFAULT_POLICY: &str = "Default local policy";
const ADMIN_EMAIL: &str = "admin@stratus.local";
/// 1 GiB.
const DEFAULT_MAX_STORAGE: i64 = 1 << 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;

    println!("Connecting to database...");
    let db = stratus_db::connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    println!("Seeding storage policy...");
    let policy_id = seed_policy(&db).await?;

    println!("Seeding default group...");
    let group_id = seed_group(&db, policy_id).await?;

    println!("Seeding admin user...");
    let user_id = seed_admin(&db, group_id).await?;
    seed_root_folder(&db, user_id).await?;

    println!("Seeding settings...");
    seed_settings(&db, &config).await?;

    let jwt = JwtService::new(JwtConfig {
        secret: config.jwt.secret.clone(),
        access_token_expires_secs: i64::try_from(config.jwt.access_token_expiry_secs)
            .unwrap_or(i64::MAX),
    });
    let token = jwt
        .generate_access_token(user_id)
        .context("failed to issue development token")?;

    println!("Seeding complete!");
    println!("  Admin user id: {user_id}");
    println!("  Development access token: {token}");
    Ok(())
}

/// Seeds the local policy storing under `uploads/{uid}`.
async fn seed_policy(db: &DatabaseConnection) -> anyhow::Result<i64> {
    if let Some(existing) = policies::Entity::find()
        .filter(policies::Column::Name.eq(DEFAULT_POLICY))
        .one(db)
        .await?
    {
        println!("  Policy already exists, skipping...");
        return Ok(existing.id);
    }

    let policy = policies::ActiveModel {
        name: Set(DEFAULT_POLICY.to_string()),
        policy_type: Set("local".to_string()),
        server: Set(String::new()),
        bucket_name: Set(String::new()),
        is_private: Set(true),
        base_url: Set(String::new()),
        access_key: Set(String::new()),
        secret_key: Set(String::new()),
        max_size: Set(0),
        auto_rename: Set(true),
        dir_name_rule: Set("uploads/{uid}/{path}".to_string()),
        file_name_rule: Set("{uid}_{randomkey8}_{originname}".to_string()),
        is_origin_link_enable: Set(false),
        options: Set(serde_json::to_string(&PolicyOptions::default())?),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    };
    let policy = policy.insert(db).await.context("failed to insert policy")?;
    println!("  Created policy: {DEFAULT_POLICY}");
    Ok(policy.id)
}

/// Seeds the group every new user joins.
async fn seed_group(db: &DatabaseConnection, policy_id: i64) -> anyhow::Result<i64> {
    if let Some(existing) = groups::Entity::find()
        .filter(groups::Column::Name.eq(DEFAULT_GROUP))
        .one(db)
        .await?
    {
        println!("  Group already exists, skipping...");
        return Ok(existing.id);
    }

    let group = groups::ActiveModel {
        name: Set(DEFAULT_GROUP.to_string()),
        max_storage: Set(DEFAULT_MAX_STORAGE),
        policies: Set(serde_json::to_string(&[policy_id])?),
        speed_limit: Set(0),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    };
    let group = group.insert(db).await.context("failed to insert group")?;
    println!("  Created group: {DEFAULT_GROUP}");
    Ok(group.id)
}

async fn seed_admin(db: &DatabaseConnection, group_id: i64) -> anyhow::Result<i64> {
    if let Some(existing) = users::Entity::find()
        .filter(users::Column::Email.eq(ADMIN_EMAIL))
        .one(db)
        .await?
    {
        println!("  Admin user already exists, skipping...");
        return Ok(existing.id);
    }

    let user = users::ActiveModel {
        email: Set(ADMIN_EMAIL.to_string()),
        nick: Set("admin".to_string()),
        status: Set(UserStatus::Active.as_i16()),
        group_id: Set(group_id),
        storage: Set(0),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    };
    let user = user.insert(db).await.context("failed to insert admin user")?;
    println!("  Created admin user: {ADMIN_EMAIL}");
    Ok(user.id)
}

async fn seed_root_folder(db: &DatabaseConnection, user_id: i64) -> anyhow::Result<()> {
    let root = folders::Entity::find()
        .filter(folders::Column::OwnerId.eq(user_id))
        .filter(folders::Column::ParentId.is_null())
        .one(db)
        .await?;
    if root.is_some() {
        return Ok(());
    }

    folders::ActiveModel {
        name: Set("/".to_string()),
        parent_id: Set(None),
        owner_id: Set(user_id),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(db)
    .await
    .context("failed to insert root folder")?;
    println!("  Created root folder");
    Ok(())
}

/// Points offline downloads at the configured scratch directory unless an
/// administrator already chose one.
async fn seed_settings(db: &DatabaseConnection, config: &AppConfig) -> anyhow::Result<()> {
    let settings = DbSettingRepository::new(db.clone());
    let current = settings.get("aria2_temp_path").await?;
    if current.as_deref().is_some_and(|v| !v.is_empty()) {
        println!("  aria2_temp_path already set, skipping...");
        return Ok(());
    }
    settings
        .set("aria2_temp_path", &config.storage.temp_path)
        .await?;
    println!("  Set aria2_temp_path = {}", config.storage.temp_path);
    Ok(())
}
