pub mod host;
pub mod job;
pub mod worker;

pub use host::{HostLifetime, StopRequest};
pub use job::{JobSlot, JobStatus, MigrationJob};
pub use worker::{
    spawn_migration_worker, DescriptorTarget, MigrationReport, MigrationTarget, MigrationWorker,
    SPAN_TARGET, STOP_SOURCE,
};
