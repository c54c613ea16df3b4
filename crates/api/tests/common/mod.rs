//! Shared helpers for router tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use stratus_api::{AppState, create_router};
use stratus_core::aria2::Aria2Service;
use stratus_core::filesystem::FsDeps;
use stratus_core::task::WorkerPool;
use stratus_core::testing::{MemoryHandler, MemoryStore, fixtures};
use stratus_shared::{JwtConfig, JwtService};

/// Router over an in-memory store with user 1.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub handler: Arc<MemoryHandler>,
    pub deps: FsDeps,
    pub token: String,
    _temp: TempDir,
}

impl TestApp {
    /// App whose user 1 may store `max_storage` bytes.
    pub fn new(max_storage: u64) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let store = MemoryStore::with_user(max_storage);
        let handler = MemoryHandler::new();
        let deps = fixtures::deps(&store, handler.clone(), temp.path().to_path_buf());
        let pool = WorkerPool::new(2);
        let aria2 = Aria2Service::new(deps.clone(), pool.clone());
        let jwt_service = Arc::new(JwtService::new(JwtConfig {
            secret: "router-test-secret".to_string(),
            access_token_expires_secs: 600,
        }));
        let token = jwt_service.generate_access_token(1).expect("token");

        let state = AppState {
            jwt_service,
            deps: deps.clone(),
            pool,
            aria2,
        };
        Self {
            router: create_router(state),
            store,
            handler,
            deps,
            token,
            _temp: temp,
        }
    }

    /// Request builder carrying the user's bearer token.
    pub fn authed(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", self.token))
    }

    /// Sends one request through a fresh clone of the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}

/// Reads a response body as JSON.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
