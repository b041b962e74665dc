//! Runs the schema migration job once and exits.
//!
//! Exit code 0 when every step is applied (or nothing was pending), 1 on any
//! failure, including bad configuration and Ctrl-C.

mod telemetry;

use db_infra::{
    spawn_migration_worker, HostLifetime, MigrationError, MigrationReport, MigrationSettings,
    MigrationWorker,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    match run().await {
        Ok(report) => {
            info!(
                applied = report.apply.applied_count(),
                already_applied = report.apply.already_applied,
                target_version = ?report.apply.target,
                attempts = report.attempts,
                elapsed_ms = report.elapsed.as_millis(),
                "migration host finished"
            );
        }
        Err(e) => {
            eprintln!("Migration failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<MigrationReport, MigrationError> {
    let settings = MigrationSettings::from_env()?;
    info!(
        database = %settings.connection.sanitized(),
        scripts_dir = %settings.scripts_dir.display(),
        ensure_database = settings.ensure_database,
        "migration host starting"
    );

    let catalog = migration::discover(&settings.scripts_dir)?;
    let host = HostLifetime::new();
    let mut task = spawn_migration_worker(MigrationWorker::from_settings(&settings, catalog), host.clone());

    let signals = {
        let host = host.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling migration");
                host.begin_shutdown();
            }
        })
    };

    let joined = tokio::select! {
        joined = &mut task => joined,
        request = host.wait_for_stop() => {
            info!(source = request.map(|r| r.source), "stop requested");
            task.await
        }
    };
    signals.abort();

    joined.map_err(|e| MigrationError::config(format!("migration task did not complete: {e}")))?
}
