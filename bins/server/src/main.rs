//! Stratus API Server
//!
//! Main entry point for the Stratus file storage service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use stratus_api::{AppState, create_router};
use stratus_core::aria2::Aria2Service;
use stratus_core::auth::HmacSigner;
use stratus_core::cache::{CacheStore, MemoStore};
use stratus_core::driver::{DriverContext, PolicyDispatcher};
use stratus_core::filesystem::{FsDeps, ImageThumbnailer};
use stratus_core::setting::SettingStore;
use stratus_core::task::WorkerPool;
use stratus_db::{connect_with, repositories};
use stratus_shared::{AppConfig, JwtConfig, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratus=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    let db = connect_with(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    info!("Connected to database");

    let repos = repositories(&db);
    let cache: Arc<dyn CacheStore> = Arc::new(MemoStore::new());
    let settings = SettingStore::new(repos.settings.clone(), cache.clone());

    let slave_api_timeout = settings.get_u64("slave_api_timeout", 60).await;
    let credential_timeout = settings.get_int("upload_credential_timeout", 3600).await;
    let preview_timeout = settings.get_int("preview_timeout", 60).await;
    let site_url = Url::parse(&config.site.url).context("invalid site.url")?;
    let driver_ctx = DriverContext::new(
        &config.storage.upload_root,
        site_url,
        HmacSigner::new(&config.site.secret_key),
        cache.clone(),
    )
    .with_thumb_suffix(config.storage.thumb_suffix.clone())
    .with_timeouts(
        Duration::from_secs(slave_api_timeout),
        credential_timeout,
        preview_timeout,
    );

    let deps = FsDeps {
        repos,
        cache,
        handlers: Arc::new(PolicyDispatcher::new(driver_ctx)),
        settings,
        thumbnailer: Arc::new(ImageThumbnailer),
        temp_root: PathBuf::from(&config.storage.temp_path),
        thumb_suffix: config.storage.thumb_suffix.clone(),
    };

    let pool = WorkerPool::from_settings(&deps.settings).await;
    let resumed = pool.resume(&deps).await?;
    info!(count = resumed.len(), "Resumed unfinished tasks");

    let aria2 = Aria2Service::new(deps.clone(), pool.clone());
    let monitors = aria2.init(false).await;
    info!(
        enabled = aria2.is_enabled(),
        monitors = monitors.len(),
        "Offline download initialized"
    );

    let jwt_service = JwtService::new(JwtConfig {
        secret: config.jwt.secret.clone(),
        access_token_expires_secs: i64::try_from(config.jwt.access_token_expiry_secs)
            .unwrap_or(i64::MAX),
    });

    let state = AppState {
        jwt_service: Arc::new(jwt_service),
        deps,
        pool,
        aria2,
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
