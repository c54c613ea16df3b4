//! Capacity accounting against a real database.
//!
//! Verifies the guarded reservation never lets `storage` pass the group's
//! `max_storage`, even with many concurrent callers.

use futures::future::join_all;
use stratus_core::repository::UserRepository;
use stratus_db::DbUserRepository;

mod common;

#[tokio::test]
async fn test_increase_within_capacity() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbUserRepository::new(db);

    assert!(repo.increase_storage(fixture.user_id, 60).await.expect("increase"));
    assert!(!repo.increase_storage(fixture.user_id, 41).await.expect("increase"));
    assert!(repo.increase_storage(fixture.user_id, 40).await.expect("increase"));

    let user = repo.find_by_id(fixture.user_id).await.expect("user");
    assert_eq!(user.storage, 100);
    assert_eq!(user.remaining_capacity(), 0);
    assert_eq!(user.policy.id, fixture.policy_id);
}

#[tokio::test]
async fn test_zero_increase_always_succeeds() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 0).await;
    let repo = DbUserRepository::new(db);

    assert!(repo.increase_storage(fixture.user_id, 0).await.expect("increase"));
}

#[tokio::test]
async fn test_deduct_floors_at_zero() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 100).await;
    let repo = DbUserRepository::new(db);

    repo.increase_storage_without_check(fixture.user_id, 30)
        .await
        .expect("increase");
    assert!(repo.deduct_storage(fixture.user_id, 10).await.expect("deduct"));
    assert!(!repo.deduct_storage(fixture.user_id, 50).await.expect("deduct"));

    let user = repo.find_by_id(fixture.user_id).await.expect("user");
    assert_eq!(user.storage, 0);
}

#[tokio::test]
async fn test_unchecked_increase_may_exceed_capacity() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 10).await;
    let repo = DbUserRepository::new(db);

    repo.increase_storage_without_check(fixture.user_id, 25)
        .await
        .expect("increase");
    let user = repo.find_by_id(fixture.user_id).await.expect("user");
    assert_eq!(user.storage, 25);
    assert!(!repo.increase_storage(fixture.user_id, 1).await.expect("increase"));
}

#[tokio::test]
async fn test_concurrent_reservations_never_overcommit() {
    let db = common::connect().await;
    let fixture = common::create_test_user(&db, 1_000).await;
    let repo = DbUserRepository::new(db);

    let attempts = (0..100).map(|_| {
        let repo = repo.clone();
        async move { repo.increase_storage(fixture.user_id, 15).await.expect("increase") }
    });
    let granted = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

    // 66 * 15 = 990; the 67th would pass 1000
    assert_eq!(granted, 66);
    let user = repo.find_by_id(fixture.user_id).await.expect("user");
    assert_eq!(user.storage, 990);
}
