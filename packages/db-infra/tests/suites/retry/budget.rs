use std::sync::atomic::{AtomicU32, Ordering};

use db_infra::infra::db::{AttemptOutcome, ExecutionAttempt};
use db_infra::{ExecutionStrategy, MigrationError};
use tokio_util::sync::CancellationToken;

use crate::common::quick_policy;

#[tokio::test]
async fn succeeds_on_third_attempt_after_two_transient_failures() {
    let strategy = ExecutionStrategy::new("apply_migrations", quick_policy(3));
    let calls = AtomicU32::new(0);
    let mut seen: Vec<ExecutionAttempt> = Vec::new();

    let result = strategy
        .run_observed(
            &CancellationToken::new(),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(MigrationError::transient(format!("timeout on attempt {n}")))
                    } else {
                        Ok(n)
                    }
                }
            },
            |attempt| seen.push(*attempt),
        )
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let outcomes: Vec<AttemptOutcome> = seen.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Transient,
            AttemptOutcome::Transient,
            AttemptOutcome::Success
        ]
    );
    let indexes: Vec<u32> = seen.iter().map(|a| a.index).collect();
    assert_eq!(indexes, vec![1, 2, 3]);
}

#[tokio::test]
async fn transient_on_every_attempt_exhausts_the_budget() {
    let strategy = ExecutionStrategy::new("apply_migrations", quick_policy(3));
    let calls = AtomicU32::new(0);

    let err = strategy
        .run(&CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(MigrationError::transient("connection refused")) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        MigrationError::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.is_transient());
            assert!(last.to_string().contains("connection refused"));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn fatal_failure_is_never_retried() {
    let strategy = ExecutionStrategy::new("apply_migrations", quick_policy(5));
    let calls = AtomicU32::new(0);

    let err = strategy
        .run(&CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(MigrationError::migration(Some(2), "syntax error")) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        err,
        MigrationError::FatalMigration {
            version: Some(2),
            ..
        }
    ));
}

#[tokio::test]
async fn provisioning_failure_is_never_retried() {
    let strategy = ExecutionStrategy::new("ensure_database", quick_policy(5));
    let calls = AtomicU32::new(0);

    let err = strategy
        .run(&CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(MigrationError::provisioning("permission denied to create database")) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, MigrationError::FatalProvisioning { .. }));
}

#[tokio::test]
async fn single_attempt_budget_reports_exhaustion_not_the_raw_error() {
    let strategy = ExecutionStrategy::new("apply_migrations", quick_policy(1));

    let err = strategy
        .run(&CancellationToken::new(), || async {
            Err::<(), _>(MigrationError::transient("deadlock detected"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::RetryExhausted { attempts: 1, .. }));
}
