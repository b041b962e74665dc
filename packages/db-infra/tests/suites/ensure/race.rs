use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use db_infra::infra::db::{ensure_database, DatabaseCreator};
use db_infra::{EnsureOutcome, MigrationError};
use sea_orm::{DbErr, RuntimeErr};

/// Creator with a fixed answer to `exists` and a fixed failure for `create`.
/// With `peer_created`, the database shows up once `create` has been tried,
/// as if another instance won the race.
struct FakeCreator {
    exists: Result<bool, String>,
    create_error: Option<String>,
    peer_created: bool,
    create_calls: AtomicU32,
}

impl FakeCreator {
    fn missing(create_error: Option<&str>) -> Self {
        Self {
            exists: Ok(false),
            create_error: create_error.map(str::to_string),
            peer_created: false,
            create_calls: AtomicU32::new(0),
        }
    }

    fn lost_race(create_error: &str) -> Self {
        Self {
            peer_created: true,
            ..Self::missing(Some(create_error))
        }
    }
}

fn exec_err(message: &str) -> DbErr {
    DbErr::Exec(RuntimeErr::Internal(message.to_string()))
}

#[async_trait]
impl DatabaseCreator for FakeCreator {
    fn describe(&self) -> String {
        "wallets".into()
    }

    async fn exists(&self) -> Result<bool, DbErr> {
        if self.peer_created && self.create_calls.load(Ordering::SeqCst) > 0 {
            return Ok(true);
        }
        self.exists.clone().map_err(|m| exec_err(&m))
    }

    async fn create(&self) -> Result<(), DbErr> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        match &self.create_error {
            Some(message) => Err(exec_err(message)),
            None => Ok(()),
        }
    }
}

#[tokio::test]
async fn existing_database_is_left_alone() {
    let creator = FakeCreator {
        exists: Ok(true),
        create_error: None,
        peer_created: false,
        create_calls: AtomicU32::new(0),
    };

    let outcome = ensure_database(&creator).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyExisted);
    assert_eq!(creator.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_database_is_created() {
    let creator = FakeCreator::missing(None);

    let outcome = ensure_database(&creator).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::Created);
    assert_eq!(creator.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn losing_the_creation_race_counts_as_success() {
    let creator = FakeCreator::missing(Some(
        "error returned from database: SQLSTATE(42P04) database \"wallets\" already exists",
    ));

    let outcome = ensure_database(&creator).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyExisted);
    assert_eq!(creator.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_detected_from_message_alone() {
    let creator = FakeCreator::missing(Some("database \"wallets\" already exists"));

    let outcome = ensure_database(&creator).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyExisted);
}

#[tokio::test]
async fn unique_violation_on_the_database_catalog_counts_as_success() {
    let creator = FakeCreator::missing(Some(
        "error returned from database: SQLSTATE(23505) duplicate key value violates \
         unique constraint \"pg_database_datname_index\"",
    ));

    let outcome = ensure_database(&creator).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyExisted);
}

#[tokio::test]
async fn unrecognised_create_failure_rechecks_existence() {
    let creator = FakeCreator::lost_race("SQLSTATE(XX000) internal error while creating database");

    let outcome = ensure_database(&creator).await.unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyExisted);
    assert_eq!(creator.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn permission_failure_is_fatal_provisioning() {
    let creator = FakeCreator::missing(Some(
        "SQLSTATE(42501) permission denied to create database",
    ));

    let err = ensure_database(&creator).await.unwrap_err();

    assert!(matches!(err, MigrationError::FatalProvisioning { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let creator = FakeCreator {
        exists: Err("connection refused".into()),
        create_error: None,
        peer_created: false,
        create_calls: AtomicU32::new(0),
    };

    let err = ensure_database(&creator).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(creator.create_calls.load(Ordering::SeqCst), 0);
}
