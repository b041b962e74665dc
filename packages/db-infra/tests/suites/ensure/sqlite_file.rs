use db_infra::infra::db::{creator_for, ensure_database};
use db_infra::EnsureOutcome;
use test_support::sqlite::TempSqlite;

use crate::common::sqlite_descriptor;

#[tokio::test]
async fn creates_missing_file_and_parent_directories() {
    let db = TempSqlite::nested().unwrap();
    assert!(!db.path().exists());
    let creator = creator_for(&sqlite_descriptor(&db));

    let outcome = ensure_database(creator.as_ref()).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::Created);
    assert!(db.path().exists());
}

#[tokio::test]
async fn second_ensure_finds_the_file() {
    let db = TempSqlite::new().unwrap();
    let creator = creator_for(&sqlite_descriptor(&db));

    let first = ensure_database(creator.as_ref()).await.unwrap();
    let second = ensure_database(creator.as_ref()).await.unwrap();

    assert_eq!(first, EnsureOutcome::Created);
    assert_eq!(second, EnsureOutcome::AlreadyExisted);
}

#[tokio::test]
async fn concurrent_ensures_both_succeed() {
    let db = TempSqlite::new().unwrap();
    let a = creator_for(&sqlite_descriptor(&db));
    let b = creator_for(&sqlite_descriptor(&db));

    let (ra, rb) = tokio::join!(ensure_database(a.as_ref()), ensure_database(b.as_ref()));

    assert!(ra.is_ok());
    assert!(rb.is_ok());
    assert!(db.path().exists());
}
