// Group content synchronization: dispatch, audit, reconcile
pub mod auditor;
pub mod dispatcher;
pub mod outcome;
pub mod primitive;
pub mod reconciler;
pub mod roster;
pub mod scheduler;
pub mod snapshot;

use serde::Deserialize;

pub use auditor::Auditor;
pub use dispatcher::{AssignmentRequest, Dispatcher};
pub use primitive::{AssignmentPrimitive, WeekPolicy};
pub use reconciler::Reconciler;
pub use roster::GroupRoster;
pub use scheduler::AuditScheduler;
pub use snapshot::GroupSnapshot;

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Individual writes in flight during one dispatch or reconcile pass
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
}

fn default_max_concurrent_writes() -> usize {
    1
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_writes: default_max_concurrent_writes(),
        }
    }
}
