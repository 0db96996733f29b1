use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::outcome::{BatchOutcome, BatchStatus};
use super::primitive::{AssignmentPrimitive, PropagationTarget, WeekPolicy};
use super::snapshot::GroupSnapshot;
use super::SyncConfig;
use crate::error::{StoreError, SyncError};
use crate::store::models::*;
use crate::store::SyncStore;

/// One bulk assignment requested for a group
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub assigned_by: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub week_policy: WeekPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub group_id: Uuid,
    pub group_assignment_id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    /// Earlier group rows deactivated by this assignment
    pub superseded: Vec<Uuid>,
    pub status: BatchStatus,
    pub outcome: BatchOutcome,
}

/// Bulk assignment dispatcher - one group row, then one attempt per member
pub struct Dispatcher {
    store: Arc<dyn SyncStore>,
    primitive: Arc<AssignmentPrimitive>,
    config: SyncConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn SyncStore>, primitive: Arc<AssignmentPrimitive>, config: SyncConfig) -> Self {
        Self {
            store,
            primitive,
            config,
        }
    }

    pub async fn dispatch(
        &self,
        snapshot: &GroupSnapshot,
        request: AssignmentRequest,
    ) -> Result<DispatchReport, SyncError> {
        // Nothing is written unless both checks pass
        if request.content_id.is_nil() {
            return Err(SyncError::Validation("No content selected".to_string()));
        }
        let members = snapshot.active_member_ids();
        if members.is_empty() {
            return Err(SyncError::Validation(format!(
                "Group '{}' has no active members",
                snapshot.group.name
            )));
        }

        info!(
            "📦 Dispatching {} {} to group {} ({} members)",
            request.kind,
            request.content_id,
            snapshot.group_id(),
            members.len()
        );

        let start_date = request
            .start_date
            .or_else(|| default_start(snapshot, request.kind));

        let new_row = NewGroupAssignment {
            group_id: snapshot.group_id(),
            kind: request.kind,
            content_id: request.content_id,
            assigned_by: request.assigned_by,
            start_date,
            end_date: request.end_date.or_else(|| default_end(snapshot, request.kind)),
        };

        let group_assignment_id = match request.kind {
            ContentKind::Diet => self.store.insert_diet_assignment(new_row).await.map(|row| row.id),
            _ => self.store.insert_content_assignment(new_row).await.map(|row| row.id),
        }
        .map_err(|e| {
            error!(
                "❌ Group-level {} assignment failed for group {}: {}",
                request.kind,
                snapshot.group_id(),
                e
            );
            group_write_failed(request.kind, e)
        })?;

        // Earlier rows are only retired once the replacement exists
        let superseded = self.supersede(snapshot, &request, group_assignment_id).await;

        let target = PropagationTarget {
            kind: request.kind,
            content_id: request.content_id,
            source_assignment_id: group_assignment_id,
            group_name: snapshot.group.name.clone(),
            start_date: start_date.unwrap_or_else(|| Utc::now().date_naive()),
        };

        let outcome = if request.kind.propagates() {
            self.primitive
                .apply_to_members(
                    &target,
                    &members,
                    request.week_policy,
                    self.config.max_concurrent_writes,
                )
                .await
        } else {
            BatchOutcome {
                skipped: members,
                ..BatchOutcome::default()
            }
        };

        let status = outcome.status();
        match status {
            BatchStatus::Failed => error!(
                "❌ {} {} reached no member of group {}; left for reconciliation",
                request.kind,
                request.content_id,
                snapshot.group_id()
            ),
            _ => info!(
                "✓ Dispatch of {} {} to group {}: {}",
                request.kind,
                request.content_id,
                snapshot.group_id(),
                outcome.summary()
            ),
        }

        Ok(DispatchReport {
            group_id: snapshot.group_id(),
            group_assignment_id,
            kind: request.kind,
            content_id: request.content_id,
            superseded,
            status,
            outcome,
        })
    }

    /// Deactivate the group rows this assignment replaces.
    ///
    /// The same content assigned again replaces its earlier row; a full-week
    /// routine also replaces any other active full-week routine. A row that
    /// cannot be deactivated stays active and is logged.
    async fn supersede(
        &self,
        snapshot: &GroupSnapshot,
        request: &AssignmentRequest,
        replacement_id: Uuid,
    ) -> Vec<Uuid> {
        let mut superseded = Vec::new();

        if request.kind == ContentKind::Diet {
            for row in snapshot
                .diet_assignments
                .iter()
                .filter(|a| a.active && a.id != replacement_id && a.diet_id == request.content_id)
            {
                match self.store.deactivate_diet_assignment(row.id).await {
                    Ok(()) => superseded.push(row.id),
                    Err(e) => warn!("⚠️ Could not supersede diet assignment {}: {}", row.id, e),
                }
            }
            return superseded;
        }

        for row in snapshot
            .content_assignments
            .iter()
            .filter(|a| a.active && a.id != replacement_id)
        {
            let same_content = row.kind == request.kind && row.content_id == request.content_id;
            let replaced_week = request.kind == ContentKind::RoutineFullWeek
                && row.kind == ContentKind::RoutineFullWeek;
            if same_content || replaced_week {
                match self.store.deactivate_content_assignment(row.id).await {
                    Ok(()) => superseded.push(row.id),
                    Err(e) => warn!("⚠️ Could not supersede group assignment {}: {}", row.id, e),
                }
            }
        }

        if !superseded.is_empty() {
            info!("Superseded {} earlier group assignment(s)", superseded.len());
        }
        superseded
    }
}

fn group_write_failed(kind: ContentKind, error: StoreError) -> SyncError {
    SyncError::GroupWrite {
        kind,
        message: error.message,
    }
}

/// Courses run on the group's course calendar unless told otherwise.
fn default_start(snapshot: &GroupSnapshot, kind: ContentKind) -> Option<NaiveDate> {
    match kind {
        ContentKind::Course => snapshot.group.course_start,
        _ => None,
    }
}

fn default_end(snapshot: &GroupSnapshot, kind: ContentKind) -> Option<NaiveDate> {
    match kind {
        ContentKind::Course => snapshot.group.course_end,
        _ => None,
    }
}
