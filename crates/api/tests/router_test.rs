//! Router smoke tests over the in-memory store.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use stratus_core::filesystem::{CALLBACK_SESSION_PREFIX, UploadSession};
use stratus_core::testing::fixtures;

use common::{TestApp, json_body};

fn upload_request(app: &TestApp, dir: &str, name: &str, body: &'static [u8]) -> Request<Body> {
    app.authed("PUT", "/api/v3/file/upload")
        .header("X-Path", dir)
        .header("X-FileName", name)
        .header("Content-Length", body.len().to_string())
        .body(Body::from(body))
        .expect("request")
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new(100);
    let response = app
        .send(Request::get("/api/v3/health").body(Body::empty()).expect("request"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["offline_download"], false);
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = TestApp::new(100);
    let response = app
        .send(Request::get("/api/v3/directory").body(Body::empty()).expect("request"))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "MISSING_TOKEN");
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let app = TestApp::new(100);
    let response = app
        .send(
            Request::get("/api/v3/tasks")
                .header("Authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_upload_charges_storage() {
    let app = TestApp::new(100);
    let response = app.send(upload_request(&app, "/", "a.txt", b"0123456789")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["name"], "a.txt");
    assert_eq!(body["size"], 10);
    assert_eq!(app.store.user(1).storage, 10);
    assert_eq!(app.store.files().len(), 1);
}

#[tokio::test]
async fn test_upload_over_quota_is_refused() {
    let app = TestApp::new(100);
    let response = app.send(upload_request(&app, "/", "big.bin", &[7u8; 101])).await;

    assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(json_body(response).await["error"], "QUOTA_EXCEEDED");
    assert_eq!(app.store.user(1).storage, 0);
    assert!(app.store.files().is_empty());
    assert_eq!(app.handler.put_count(), 0);
}

#[tokio::test]
async fn test_upload_requires_headers() {
    let app = TestApp::new(100);
    let request = app
        .authed("PUT", "/api/v3/file/upload")
        .header("Content-Length", "3")
        .body(Body::from("abc"))
        .expect("request");
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_create_and_list_directory() {
    let app = TestApp::new(100);
    let create = app
        .authed("PUT", "/api/v3/directory")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({ "path": "/docs/2024" }).to_string()))
        .expect("request");
    assert_eq!(app.send(create).await.status(), StatusCode::CREATED);

    let upload = app.send(upload_request(&app, "/docs", "a.txt", b"hello")).await;
    assert_eq!(upload.status(), StatusCode::OK);

    let response = app
        .send(app.authed("GET", "/api/v3/directory/docs").body(Body::empty()).expect("request"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let mut names: Vec<String> = body["objects"]
        .as_array()
        .expect("objects")
        .iter()
        .map(|o| o["name"].as_str().unwrap_or_default().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["2024".to_string(), "a.txt".to_string()]);
}

#[tokio::test]
async fn test_list_missing_directory_is_not_found() {
    let app = TestApp::new(100);
    let response = app
        .send(app.authed("GET", "/api/v3/directory/nope").body(Body::empty()).expect("request"))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_refunds_storage() {
    let app = TestApp::new(100);
    let file = app.store.seed_file(1, "a.txt", 10);
    app.store.set_storage(1, 10);
    app.handler.insert(&file.source_name, b"0123456789");

    let request = app
        .authed("POST", "/api/v3/object/delete")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({ "items": [file.id] }).to_string()))
        .expect("request");
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.store.user(1).storage, 0);
    assert!(app.store.file(file.id).is_none());
}

#[tokio::test]
async fn test_rename_rejects_illegal_name() {
    let app = TestApp::new(100);
    let file = app.store.seed_file(1, "a.txt", 1);

    let request = app
        .authed("POST", "/api/v3/object/rename")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "src": { "items": [file.id] }, "new_name": "a/b.txt" }).to_string(),
        ))
        .expect("request");
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.file(file.id).map(|f| f.name), Some("a.txt".to_string()));
}

#[tokio::test]
async fn test_callback_with_unknown_key_is_bad_request() {
    let app = TestApp::new(100);
    let request = Request::post("/api/v3/callback/s3/missing")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({ "key": "1/a.txt", "etag": "x" }).to_string()))
        .expect("request");
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn s3_session(app: &TestApp, key: &str, size: u64) -> UploadSession {
    let mut policy = fixtures::local_policy(2);
    policy.policy_type = "s3".to_string();
    app.store.add_policy(policy);

    let session = UploadSession {
        key: key.to_string(),
        uid: 1,
        policy_id: 2,
        virtual_path: "/".to_string(),
        name: "a.txt".to_string(),
        size,
        save_path: "1/a.txt".to_string(),
    };
    app.deps
        .cache
        .set_as(&format!("{CALLBACK_SESSION_PREFIX}{key}"), &session, None)
        .await
        .expect("cache session");
    session
}

fn s3_callback(key: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(format!("/api/v3/callback/s3/{key}"))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_s3_callback_rejects_undersized_declaration() {
    let app = TestApp::new(100);
    s3_session(&app, "small", 1).await;
    app.handler.insert("1/a.txt", b"0123456789");

    let response = app
        .send(s3_callback("small", json!({ "key": "1/a.txt", "etag": "", "size": 1 })))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.files().is_empty());
    assert_eq!(app.store.user(1).storage, 0);
}

#[tokio::test]
async fn test_s3_callback_charges_declared_size() {
    let app = TestApp::new(100);
    s3_session(&app, "exact", 10).await;
    app.handler.insert("1/a.txt", b"0123456789");

    let response = app
        .send(s3_callback("exact", json!({ "key": "1/a.txt", "etag": "" })))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["size"], 10);
    assert_eq!(app.store.user(1).storage, 10);
}

#[tokio::test]
async fn test_offline_download_disabled() {
    let app = TestApp::new(100);
    let request = app
        .authed("POST", "/api/v3/aria2/url")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "url": "http://example.com/a.iso", "dst": "/" }).to_string(),
        ))
        .expect("request");
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.store.downloads().is_empty());
}

#[tokio::test]
async fn test_aria2_events_reject_unknown_method() {
    let app = TestApp::new(100);
    let known = Request::post("/api/v3/aria2/events")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "method": "aria2.onDownloadComplete", "params": [{ "gid": "abc" }] })
                .to_string(),
        ))
        .expect("request");
    assert_eq!(app.send(known).await.status(), StatusCode::NO_CONTENT);

    let unknown = Request::post("/api/v3/aria2/events")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({ "method": "aria2.onSomething", "params": [] }).to_string()))
        .expect("request");
    assert_eq!(app.send(unknown).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_aria2_events_check_token() {
    let app = TestApp::new(100);
    app.store.put_setting("aria2_token", "relay-secret");
    let body = json!({ "method": "aria2.onDownloadStart", "params": [] }).to_string();

    let anonymous = Request::post("/api/v3/aria2/events")
        .header("Content-Type", "application/json")
        .body(Body::from(body.clone()))
        .expect("request");
    assert_eq!(app.send(anonymous).await.status(), StatusCode::UNAUTHORIZED);

    let signed = Request::post("/api/v3/aria2/events")
        .header("Content-Type", "application/json")
        .header("Authorization", "Bearer relay-secret")
        .body(Body::from(body))
        .expect("request");
    assert_eq!(app.send(signed).await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_tasks_are_paged() {
    let app = TestApp::new(100);
    for _ in 0..3 {
        app.store
            .seed_task(1, stratus_core::model::TaskStatus::Complete, "{}");
    }

    let response = app
        .send(
            app.authed("GET", "/api/v3/tasks?page=1&per_page=2")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["total_pages"], 2);
}

#[tokio::test]
async fn test_compress_queues_job() {
    let app = TestApp::new(1000);
    let file = app.store.seed_file(1, "a.txt", 5);
    app.handler.insert(&file.source_name, b"hello");

    let request = app
        .authed("POST", "/api/v3/file/compress")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "src": { "items": [file.id] }, "dst": "/", "name": "a.zip" }).to_string(),
        ))
        .expect("request");
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = json_body(response).await["task_id"].as_i64().expect("task id");
    assert!(app.store.task(task_id).is_some());
}
