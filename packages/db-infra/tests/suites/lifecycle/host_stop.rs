use std::sync::Arc;

use db_infra::lifecycle::STOP_SOURCE;
use db_infra::{spawn_migration_worker, HostLifetime, MigrationError, MigrationWorker};
use serial_test::serial;

use crate::common::{quick_policy, wallet_catalog, ScriptedTarget};

#[tokio::test]
#[serial(job_slot)]
async fn host_is_asked_to_stop_after_success() {
    let target = Arc::new(ScriptedTarget::default());
    let worker = MigrationWorker::new(target, wallet_catalog(), Some(quick_policy(2)), quick_policy(2));
    let host = HostLifetime::new();

    let handle = spawn_migration_worker(worker, host.clone());
    let request = host.wait_for_stop().await;
    let report = handle.await.unwrap().unwrap();

    assert_eq!(request.map(|r| r.source), Some(STOP_SOURCE));
    assert_eq!(report.apply.applied, vec![1, 2, 3]);
    assert!(!host.stopping().is_cancelled());
}

#[tokio::test]
#[serial(job_slot)]
async fn host_is_not_asked_to_stop_after_failure() {
    let target = Arc::new(ScriptedTarget::default());
    target
        .ensure_script
        .lock()
        .unwrap()
        .push(Err(MigrationError::provisioning("permission denied to create database")));
    let worker = MigrationWorker::new(target.clone(), wallet_catalog(), Some(quick_policy(3)), quick_policy(3));
    let host = HostLifetime::new();

    let result = spawn_migration_worker(worker, host.clone()).await.unwrap();

    assert!(matches!(result, Err(MigrationError::FatalProvisioning { .. })));
    assert_eq!(target.ensure_calls(), 1);
    assert_eq!(target.apply_calls(), 0);
    assert_eq!(host.stop_request(), None);
}
