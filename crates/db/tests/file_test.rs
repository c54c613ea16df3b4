//! Integration tests for the file and folder repositories.

use stratus_core::model::{NewFile, NewFolder};
use stratus_core::repository::{FileRepository, FolderRepository, RepoError};
use stratus_db::{DbFileRepository, DbFolderRepository};

mod common;

fn new_file(fixture: &common::TestUser, folder_id: i64, name: &str, source: &str) -> NewFile {
    NewFile {
        name: name.to_string(),
        source_name: source.to_string(),
        user_id: fixture.user_id,
        size: 10,
        pic_info: String::new(),
        folder_id,
        policy_id: fixture.policy_id,
    }
}

#[tokio::test]
async fn test_duplicate_name_is_conflict() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbFileRepository::new(db);

    repo.create(new_file(&fixture, fixture.root_id, "a.txt", "uploads/a.txt"))
        .await
        .expect("create");
    let err = repo
        .create(new_file(&fixture, fixture.root_id, "a.txt", "uploads/b.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
}

#[tokio::test]
async fn test_soft_links_share_source() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbFileRepository::new(db);

    let first = repo
        .create(new_file(&fixture, fixture.root_id, "a.txt", "uploads/shared.bin"))
        .await
        .expect("create");
    repo.create(new_file(&fixture, fixture.root_id, "b.txt", "uploads/shared.bin"))
        .await
        .expect("create");

    let linked = repo
        .find_by_sources(fixture.policy_id, &["uploads/shared.bin".to_string()])
        .await
        .expect("sources");
    assert_eq!(linked.len(), 2);

    repo.delete_by_ids(&[first.id]).await.expect("delete");
    let linked = repo
        .find_by_sources(fixture.policy_id, &["uploads/shared.bin".to_string()])
        .await
        .expect("sources");
    assert_eq!(linked.len(), 1);
}

#[tokio::test]
async fn test_updates_and_ownership() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let other = common::create_test_user(&db, 100).await;
    let repo = DbFileRepository::new(db);

    let file = repo
        .create(new_file(&fixture, fixture.root_id, "pic.png", "uploads/pic.png"))
        .await
        .expect("create");
    repo.update_size(file.id, 42).await.expect("size");
    repo.update_pic_info(file.id, "640,480").await.expect("pic");
    repo.rename(file.id, fixture.user_id, "photo.png").await.expect("rename");

    let loaded = repo.find_by_id(file.id, fixture.user_id).await.expect("load");
    assert_eq!((loaded.size, loaded.pic_info.as_str(), loaded.name.as_str()), (42, "640,480", "photo.png"));

    let err = repo.find_by_id(file.id, other.user_id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}

#[tokio::test]
async fn test_folder_tree() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbFolderRepository::new(db);

    let root = repo.find_root(fixture.user_id).await.expect("root").expect("exists");
    assert!(root.is_root());

    let docs = repo
        .create(NewFolder {
            name: "docs".to_string(),
            parent_id: Some(root.id),
            owner_id: fixture.user_id,
        })
        .await
        .expect("create");
    let err = repo
        .create(NewFolder {
            name: "docs".to_string(),
            parent_id: Some(root.id),
            owner_id: fixture.user_id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));

    let found = repo
        .find_child(root.id, fixture.user_id, "docs")
        .await
        .expect("child");
    assert_eq!(found.map(|f| f.id), Some(docs.id));

    let children = repo.list_children(&[root.id], fixture.user_id).await.expect("children");
    assert_eq!(children.len(), 1);
}
