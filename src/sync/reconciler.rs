use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::auditor::{AuditReport, Auditor, Discrepancy};
use super::outcome::{BatchOutcome, BatchStatus};
use super::primitive::{AssignmentPrimitive, PropagationTarget, WeekPolicy};
use super::snapshot::GroupSnapshot;
use super::SyncConfig;
use crate::error::SyncError;
use crate::store::SyncStore;

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub status: BatchStatus,
    pub outcome: BatchOutcome,
    /// Fresh audit taken after the repairs
    pub audit: AuditReport,
}

/// Re-issues the individual rows an audit found missing
pub struct Reconciler {
    store: Arc<dyn SyncStore>,
    primitive: Arc<AssignmentPrimitive>,
    auditor: Arc<Auditor>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SyncStore>,
        primitive: Arc<AssignmentPrimitive>,
        auditor: Arc<Auditor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            primitive,
            auditor,
            config,
        }
    }

    pub async fn reconcile(
        &self,
        snapshot: &GroupSnapshot,
        discrepancies: &[Discrepancy],
    ) -> Result<ReconcileReport, SyncError> {
        let group_id = snapshot.group_id();
        info!(
            "🔄 Reconciling group {}: {} discrepancies",
            group_id,
            discrepancies.len()
        );

        let mut outcome = BatchOutcome::default();

        for discrepancy in discrepancies {
            // The audit may be older than the latest membership or assignment change
            let Some(assignment) = snapshot.find_assignment(discrepancy.group_assignment_id) else {
                warn!(
                    "⏭️ Assignment {} is no longer active in group {}, skipping",
                    discrepancy.group_assignment_id, group_id
                );
                continue;
            };

            let students: Vec<_> = discrepancy
                .missing
                .iter()
                .map(|m| m.student_id)
                .filter(|s| snapshot.is_member(*s))
                .collect();

            let target = PropagationTarget {
                kind: assignment.kind,
                content_id: assignment.content_id,
                source_assignment_id: assignment.id,
                group_name: snapshot.group.name.clone(),
                start_date: assignment.start_date.unwrap_or_else(|| Utc::now().date_naive()),
            };

            // Keep whatever days a member already has; only gaps are filled
            let pass = self
                .primitive
                .apply_to_members(&target, &students, WeekPolicy::Merge, self.config.max_concurrent_writes)
                .await;
            info!(
                "{} {}: {}",
                discrepancy.kind,
                discrepancy.content_id,
                pass.summary()
            );
            outcome.merge(pass);
        }

        let refreshed = GroupSnapshot::load(self.store.as_ref(), group_id).await?;
        let audit = self.auditor.audit(&refreshed).await;

        info!(
            "✓ Reconciliation of group {} done: {}; consistent now: {}",
            group_id,
            outcome.summary(),
            audit.consistent
        );

        Ok(ReconcileReport {
            status: outcome.status(),
            outcome,
            audit,
        })
    }
}
