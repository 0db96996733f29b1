use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::store::models::*;
use crate::sync::auditor::AuditReport;
use crate::sync::dispatcher::DispatchReport;
use crate::sync::outcome::BatchStatus;
use crate::sync::reconciler::ReconcileReport;
use crate::sync::roster::{MembershipChange, RemovalReport, UnassignReport};
use crate::sync::snapshot::GroupSnapshot;
use crate::sync::WeekPolicy;

// ========== REQUEST MODELS ==========

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_new_group_dates", skip_on_field_errors = false))]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub objective: Option<String>,
    pub course_start: Option<NaiveDate>,
    pub course_end: Option<NaiveDate>,
}

impl From<CreateGroupRequest> for NewGroup {
    fn from(request: CreateGroupRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            objective: request.objective,
            course_start: request.course_start,
            course_end: request.course_end,
        }
    }
}

/// Partial group edit; omitted fields are left unchanged
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_group_update_dates", skip_on_field_errors = false))]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub objective: Option<String>,
    pub course_start: Option<NaiveDate>,
    pub course_end: Option<NaiveDate>,
    pub active: Option<bool>,
}

impl From<UpdateGroupRequest> for GroupUpdate {
    fn from(request: UpdateGroupRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            objective: request.objective,
            course_start: request.course_start,
            course_end: request.course_end,
            active: request.active,
        }
    }
}

/// Students to add to a group
#[derive(Debug, Deserialize, Validate)]
pub struct AddMembersRequest {
    #[validate(length(min = 1, max = 500, message = "select between 1 and 500 students"))]
    pub student_ids: Vec<Uuid>,
}

/// Bulk assignment of one content item to every member of a group
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_assignment_dates", skip_on_field_errors = false))]
pub struct CreateAssignmentRequest {
    pub kind: ContentKind,
    #[validate(custom = "validate_content_id")]
    pub content_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Full-week routines only; defaults to overwriting the student's week
    #[serde(default)]
    pub week_policy: WeekPolicy,
}

#[derive(Debug, Deserialize)]
pub struct RemoveMemberQuery {
    /// Also revoke course and diet rows this group granted
    #[serde(default)]
    pub cleanup: bool,
}

fn validate_content_id(id: &Uuid) -> Result<(), validator::ValidationError> {
    if id.is_nil() {
        let mut error = validator::ValidationError::new("content_required");
        error.message = Some("no content selected".into());
        return Err(error);
    }
    Ok(())
}

fn check_date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    message: &'static str,
) -> Result<(), validator::ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            let mut error = validator::ValidationError::new("date_range");
            error.message = Some(message.into());
            return Err(error);
        }
    }
    Ok(())
}

fn validate_assignment_dates(request: &CreateAssignmentRequest) -> Result<(), validator::ValidationError> {
    check_date_range(request.start_date, request.end_date, "end_date must not precede start_date")
}

fn validate_new_group_dates(request: &CreateGroupRequest) -> Result<(), validator::ValidationError> {
    check_date_range(request.course_start, request.course_end, "course_end must not precede course_start")
}

fn validate_group_update_dates(request: &UpdateGroupRequest) -> Result<(), validator::ValidationError> {
    check_date_range(request.course_start, request.course_end, "course_end must not precede course_start")
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub store: String,
}

#[derive(Debug, Serialize)]
pub struct GroupDetailResponse {
    pub group: Group,
    pub members: Vec<Membership>,
    pub content_assignments: Vec<GroupContentAssignment>,
    pub diet_assignments: Vec<GroupDietAssignment>,
    /// Whether opening the group queued a consistency audit
    pub audit_scheduled: bool,
}

impl GroupDetailResponse {
    pub fn new(snapshot: GroupSnapshot, audit_scheduled: bool) -> Self {
        Self {
            group: snapshot.group,
            members: snapshot.members,
            content_assignments: snapshot.content_assignments,
            diet_assignments: snapshot.diet_assignments,
            audit_scheduled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub message: String,
    pub group: Group,
}

#[derive(Debug, Serialize)]
pub struct MembersAddedResponse {
    pub message: String,
    #[serde(flatten)]
    pub change: MembershipChange,
}

#[derive(Debug, Serialize)]
pub struct MemberRemovedResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: RemovalReport,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    /// Counts only; per-member reasons are in `report.outcome.failed`
    pub message: String,
    pub report: DispatchReport,
}

impl From<DispatchReport> for DispatchResponse {
    fn from(report: DispatchReport) -> Self {
        let message = match report.status {
            BatchStatus::Complete => format!(
                "Assigned to {} members",
                report.outcome.ok_count()
            ),
            BatchStatus::NotPropagated => "Assigned to the group; members schedule it themselves".to_string(),
            BatchStatus::Partial | BatchStatus::Failed => report.outcome.summary(),
        };
        Self { message, report }
    }
}

#[derive(Debug, Serialize)]
pub struct UnassignResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: UnassignReport,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub message: String,
    pub report: AuditReport,
}

impl From<AuditReport> for AuditResponse {
    fn from(report: AuditReport) -> Self {
        let message = if report.consistent {
            "All members are in sync".to_string()
        } else {
            format!(
                "{} assignments missing for {} member entries",
                report.discrepancies.len(),
                report.missing_count()
            )
        };
        Self { message, report }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: ReconcileReport,
}

impl From<ReconcileReport> for ReconcileResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            message: report.outcome.summary(),
            report,
        }
    }
}
