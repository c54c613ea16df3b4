//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - The `/api/v3` REST routes over the core file system
//! - Bearer token authentication middleware
//! - Storage callback and aria2 push endpoints
//! - Mapping from core errors to JSON error bodies

pub mod error;
pub mod middleware;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use stratus_core::aria2::Aria2Service;
use stratus_core::filesystem::FsDeps;
use stratus_core::task::WorkerPool;
use stratus_shared::JwtService;

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// JWT service for token operations.
    pub jwt_service: Arc<JwtService>,
    /// File system collaborators.
    pub deps: FsDeps,
    /// Background job pool.
    pub pool: WorkerPool,
    /// Offline download service.
    pub aria2: Aria2Service,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v3", routes::api_routes_with_state(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
