use serde::Serialize;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::models::ContentKind;

/// What the per-member primitive did for one student
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberResult {
    /// New individual rows were written
    Created(usize),
    /// The student already had what the group assignment implies
    Unchanged,
    /// The content kind is not propagated to members
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberFailure {
    pub student_id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Complete,
    Partial,
    Failed,
    NotPropagated,
}

/// Per-member results of a dispatch or reconcile pass, keyed by student.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<Uuid>,
    pub unchanged: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
    pub failed: Vec<MemberFailure>,
}

impl BatchOutcome {
    pub fn record(
        &mut self,
        student_id: Uuid,
        kind: ContentKind,
        content_id: Uuid,
        result: Result<MemberResult, SyncError>,
    ) {
        match result {
            Ok(MemberResult::Created(_)) => self.succeeded.push(student_id),
            Ok(MemberResult::Unchanged) => self.unchanged.push(student_id),
            Ok(MemberResult::Skipped) => self.skipped.push(student_id),
            Err(e) => self.failed.push(MemberFailure {
                student_id,
                kind,
                content_id,
                reason: e.to_string(),
            }),
        }
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.succeeded.extend(other.succeeded);
        self.unchanged.extend(other.unchanged);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// Members that ended up holding the content, new or pre-existing.
    pub fn ok_count(&self) -> usize {
        self.succeeded.len() + self.unchanged.len()
    }

    pub fn status(&self) -> BatchStatus {
        if self.failed.is_empty() {
            if self.ok_count() == 0 && !self.skipped.is_empty() {
                BatchStatus::NotPropagated
            } else {
                BatchStatus::Complete
            }
        } else if self.ok_count() == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }

    pub fn summary(&self) -> String {
        format!("{} succeeded, {} failed", self.ok_count(), self.failed.len())
    }
}
