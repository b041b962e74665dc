use db_infra::infra::db::{creator_for, ensure_database};
use db_infra::EnsureOutcome;

use crate::common::skip_unless_postgres;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_create_database_succeeds_for_both_instances() {
    let Some(pg) = skip_unless_postgres("concurrent_create_database_succeeds_for_both_instances")
    else {
        return;
    };

    for _round in 0..5 {
        let descriptor = pg.fresh_descriptor();
        let a = creator_for(&descriptor);
        let b = creator_for(&descriptor);

        let (ra, rb) = tokio::join!(ensure_database(a.as_ref()), ensure_database(b.as_ref()));

        let outcomes = [ra.expect("first instance"), rb.expect("second instance")];
        let created = outcomes
            .iter()
            .filter(|o| **o == EnsureOutcome::Created)
            .count();
        assert_eq!(created, 1, "exactly one instance creates the database");

        pg.drop_database(&descriptor).await;
    }
}

#[tokio::test]
async fn existing_database_is_reported_as_such() {
    let Some(pg) = skip_unless_postgres("existing_database_is_reported_as_such") else {
        return;
    };
    let descriptor = pg.fresh_descriptor();
    let creator = creator_for(&descriptor);

    let first = ensure_database(creator.as_ref()).await.unwrap();
    let second = ensure_database(creator.as_ref()).await.unwrap();

    assert_eq!(first, EnsureOutcome::Created);
    assert_eq!(second, EnsureOutcome::AlreadyExisted);
    pg.drop_database(&descriptor).await;
}
