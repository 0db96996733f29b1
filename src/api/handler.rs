use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    config::{AuditConfig, StoreBackend},
    error::{AppError, AppResult},
    middleware::{CurrentUser, ValidatedJson},
    store::SyncStore,
    sync::{AssignmentRequest, AuditScheduler, Dispatcher, GroupRoster, GroupSnapshot, Reconciler},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SyncStore>,
    pub backend: StoreBackend,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<Reconciler>,
    pub roster: Arc<GroupRoster>,
    pub scheduler: Arc<AuditScheduler>,
    pub audit: AuditConfig,
}

impl AppState {
    /// Queue the audit that follows a change to the group.
    fn audit_after_change(&self, group_id: Uuid) {
        // Fire and forget; the report lands in the scheduler's cache
        drop(self.scheduler.schedule(group_id, self.audit.mutation_delay()));
    }

    async fn snapshot(&self, group_id: Uuid) -> AppResult<GroupSnapshot> {
        Ok(GroupSnapshot::load(self.store.as_ref(), group_id).await?)
    }
}

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        store: match state.backend {
            StoreBackend::Postgres => "postgres".to_string(),
            StoreBackend::Memory => "memory".to_string(),
        },
    }))
}

/// POST /groups
pub async fn create_group(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(request): ValidatedJson<CreateGroupRequest>,
) -> AppResult<Json<GroupResponse>> {
    info!("🆕 User {} creating group '{}'", user, request.name);

    let group = state.roster.create_group(request.into()).await?;

    Ok(Json(GroupResponse {
        message: format!("Group '{}' created", group.name),
        group,
    }))
}

/// PATCH /groups/:id
pub async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(request): ValidatedJson<UpdateGroupRequest>,
) -> AppResult<Json<GroupResponse>> {
    info!("✏️ User {} updating group {}", user, group_id);

    let group = state.roster.update_group(group_id, request.into()).await?;

    Ok(Json(GroupResponse {
        message: format!("Group '{}' updated", group.name),
        group,
    }))
}

/// GET /groups/:id - Group detail; queues the initial audit when there is something to check
pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<GroupDetailResponse>> {
    let snapshot = state.snapshot(group_id).await?;

    let audit_scheduled = snapshot.has_work();
    if audit_scheduled {
        drop(state.scheduler.schedule(group_id, state.audit.initial_delay()));
    }

    Ok(Json(GroupDetailResponse::new(snapshot, audit_scheduled)))
}

/// POST /groups/:id/members
pub async fn add_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(request): ValidatedJson<AddMembersRequest>,
) -> AppResult<Json<MembersAddedResponse>> {
    info!("👥 User {} adding {} students to group {}", user, request.student_ids.len(), group_id);

    let change = state.roster.add_members(group_id, &request.student_ids).await?;
    if change.joined() > 0 {
        state.audit_after_change(group_id);
    }

    Ok(Json(MembersAddedResponse {
        message: format!("{} added, {} failed", change.joined(), change.failed.len()),
        change,
    }))
}

/// DELETE /groups/:id/members/:student_id?cleanup=true
pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, student_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<RemoveMemberQuery>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<MemberRemovedResponse>> {
    info!("👋 User {} removing student {} from group {}", user, student_id, group_id);

    let report = state.roster.remove_member(group_id, student_id, query.cleanup).await?;
    state.audit_after_change(group_id);

    Ok(Json(MemberRemovedResponse {
        message: format!(
            "Member removed; {} course grants and {} diets revoked",
            report.course_grants_revoked, report.diet_rows_revoked
        ),
        report,
    }))
}

/// POST /groups/:id/assignments - Bulk assign content to every member
pub async fn create_assignment(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(request): ValidatedJson<CreateAssignmentRequest>,
) -> AppResult<Json<DispatchResponse>> {
    let snapshot = state.snapshot(group_id).await?;

    let report = state
        .dispatcher
        .dispatch(
            &snapshot,
            AssignmentRequest {
                kind: request.kind,
                content_id: request.content_id,
                assigned_by: user,
                start_date: request.start_date,
                end_date: request.end_date,
                week_policy: request.week_policy,
            },
        )
        .await?;
    state.audit_after_change(group_id);

    Ok(Json(DispatchResponse::from(report)))
}

/// DELETE /groups/:id/assignments/:assignment_id
pub async fn unassign_content(
    State(state): State<AppState>,
    Path((group_id, assignment_id)): Path<(Uuid, Uuid)>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<UnassignResponse>> {
    info!("🗑️ User {} unassigning {} from group {}", user, assignment_id, group_id);

    let report = state.roster.unassign_content(group_id, assignment_id).await?;
    state.audit_after_change(group_id);

    Ok(Json(UnassignResponse {
        message: format!("{} member rows revoked", report.individual_rows_revoked),
        report,
    }))
}

/// GET /groups/:id/audit - Audit now
pub async fn run_audit(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<AuditResponse>> {
    let report = state.scheduler.run_now(group_id).await?;
    Ok(Json(AuditResponse::from(report)))
}

/// GET /groups/:id/audit/latest - Last finished audit, scheduled or manual
pub async fn latest_audit(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<AuditResponse>> {
    let report = state
        .scheduler
        .latest(group_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("audit of group {}", group_id)))?;
    Ok(Json(AuditResponse::from(report)))
}

/// POST /groups/:id/reconcile - Audit, repair what is missing, audit again
pub async fn reconcile(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ReconcileResponse>> {
    info!("🔄 User {} reconciling group {}", user, group_id);

    let report = state
        .scheduler
        .reconcile_now(group_id, &state.reconciler)
        .await?;

    Ok(Json(ReconcileResponse::from(report)))
}
