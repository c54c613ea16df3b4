//! Integration tests for the task, download and setting repositories.

use stratus_core::model::{DownloadStatus, DownloadType, NewDownload, NewTask, TaskStatus};
use stratus_core::repository::{DownloadRepository, SettingRepository, TaskRepository};
use stratus_db::{DbDownloadRepository, DbSettingRepository, DbTaskRepository};

mod common;

#[tokio::test]
async fn test_task_lifecycle() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbTaskRepository::new(db);

    let task = repo
        .create(NewTask {
            task_type: 0,
            user_id: fixture.user_id,
            props: r#"{"dirs":[],"files":[1],"dst":"/a.zip"}"#.to_string(),
        })
        .await
        .expect("create");
    assert_eq!(task.status, TaskStatus::Queued);

    repo.update_status(task.id, TaskStatus::Processing).await.expect("status");
    repo.update_progress(task.id, 4).await.expect("progress");
    repo.update_error(task.id, r#"{"msg":"failed"}"#).await.expect("error");

    let loaded = repo.find_by_id(task.id).await.expect("load");
    assert_eq!(loaded.status, TaskStatus::Processing);
    assert_eq!(loaded.progress, 4);
    assert_eq!(loaded.error.as_deref(), Some(r#"{"msg":"failed"}"#));

    let unfinished = repo
        .list_by_status(&[TaskStatus::Queued, TaskStatus::Processing])
        .await
        .expect("list");
    assert!(unfinished.iter().any(|t| t.id == task.id));
}

#[tokio::test]
async fn test_task_pages_newest_first() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbTaskRepository::new(db);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let task = repo
            .create(NewTask {
                task_type: 2,
                user_id: fixture.user_id,
                props: "{}".to_string(),
            })
            .await
            .expect("create");
        ids.push(task.id);
    }

    let (page, total) = repo.list_by_user(fixture.user_id, 0, 2).await.expect("page");
    assert_eq!(total, 3);
    assert_eq!(page.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
}

#[tokio::test]
async fn test_download_save_round_trip() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbDownloadRepository::new(db);

    let mut download = repo
        .create(NewDownload {
            download_type: DownloadType::Url,
            source: "http://example.com/a.iso".to_string(),
            gid: "2089b05ecca3d829".to_string(),
            parent: "/tmp/aria2/1".to_string(),
            dst: "/".to_string(),
            user_id: fixture.user_id,
        })
        .await
        .expect("create");
    assert_eq!(download.status, DownloadStatus::Ready);

    download.status = DownloadStatus::Downloading;
    download.total_size = 1_000;
    download.downloaded_size = 250;
    download.speed = 50;
    repo.save(&download).await.expect("save");

    let active = repo.list_by_status(&DownloadStatus::ACTIVE).await.expect("active");
    let loaded = active.iter().find(|d| d.id == download.id).expect("listed");
    assert_eq!((loaded.total_size, loaded.downloaded_size, loaded.speed), (1_000, 250, 50));
}

#[tokio::test]
async fn test_setting_upsert() {
    let db = common::connect().await;
    let repo = DbSettingRepository::new(db);
    let name = format!("test_setting_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());

    assert_eq!(repo.get(&name).await.expect("get"), None);
    repo.set(&name, "1").await.expect("set");
    repo.set(&name, "2").await.expect("set");
    assert_eq!(repo.get(&name).await.expect("get").as_deref(), Some("2"));
}
