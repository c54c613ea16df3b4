//! API route definitions.

use axum::{Router, middleware};

use crate::{ApiError, AppState, middleware::auth::auth_middleware};
use stratus_core::filesystem::FileSystem;

pub mod aria2;
pub mod callback;
pub mod directory;
pub mod file;
pub mod health;
pub mod object;
pub mod task;

/// Creates the routes that need no bearer token.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(callback::routes())
        .merge(aria2::event_routes())
}

/// Creates the API router with protected routes that need state for middleware.
#[allow(clippy::needless_pass_by_value)]
pub fn api_routes_with_state(state: AppState) -> Router<AppState> {
    let protected_routes = Router::new()
        .merge(file::routes())
        .merge(directory::routes())
        .merge(object::routes())
        .merge(aria2::routes())
        .merge(task::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    api_routes().merge(protected_routes)
}

/// Builds a file system facade for the authenticated user.
pub(crate) async fn user_fs(state: &AppState, user_id: i64) -> Result<FileSystem, ApiError> {
    Ok(state.deps.new_fs(user_id).await?)
}
