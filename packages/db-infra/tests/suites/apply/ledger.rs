use db_infra::infra::db::{apply, apply_with_descriptor, creator_for, ensure_database, ledger_entries};
use migration::{SchemaStep, SchemaVersion};
use test_support::sqlite::TempSqlite;

use crate::common::{open, schema_objects, sqlite_descriptor, wallet_catalog, wallet_columns};

#[tokio::test]
async fn ledger_records_every_step_exactly_once() {
    let db = TempSqlite::new().unwrap();
    let conn = open(&db).await;
    let catalog = wallet_catalog();

    let report = apply(&conn, &catalog).await.unwrap();

    assert_eq!(report.applied, vec![1, 2, 3]);
    assert_eq!(report.already_applied, 0);
    assert_eq!(report.target, Some(3));

    let ledger = ledger_entries(&conn).await.unwrap();
    let versions: Vec<i64> = ledger.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    for (entry, step) in ledger.iter().zip(catalog.iter()) {
        assert_eq!(entry.name, step.name());
        assert_eq!(entry.checksum, step.checksum());
        assert!(!entry.applied_at.is_empty());
    }
    assert_eq!(wallet_columns(&conn).await, vec!["id", "owner", "balance"]);
}

#[tokio::test]
async fn partially_migrated_database_only_gets_the_missing_steps() {
    let db = TempSqlite::new().unwrap();
    let conn = open(&db).await;
    let catalog = wallet_catalog();
    let first_two =
        SchemaVersion::new(catalog.iter().take(2).cloned().collect::<Vec<SchemaStep>>()).unwrap();

    apply(&conn, &first_two).await.unwrap();
    let report = apply(&conn, &catalog).await.unwrap();

    assert_eq!(report.applied, vec![3]);
    assert_eq!(report.already_applied, 2);
    let versions: Vec<i64> = ledger_entries(&conn)
        .await
        .unwrap()
        .iter()
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
async fn empty_catalog_only_creates_the_ledger() {
    let db = TempSqlite::new().unwrap();
    let conn = open(&db).await;

    let report = apply(&conn, &SchemaVersion::empty()).await.unwrap();

    assert_eq!(report.applied_count(), 0);
    assert_eq!(report.target, None);
    assert_eq!(schema_objects(&conn).await, vec!["table:schema_migrations"]);
}

#[tokio::test]
async fn descriptor_attempt_verifies_ledger_against_catalog() {
    let db = TempSqlite::new().unwrap();
    let descriptor = sqlite_descriptor(&db);
    ensure_database(creator_for(&descriptor).as_ref())
        .await
        .unwrap();

    let report = apply_with_descriptor(&descriptor, &wallet_catalog())
        .await
        .unwrap();

    assert_eq!(report.applied, vec![1, 2, 3]);
}
