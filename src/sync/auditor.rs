use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::primitive::routine_week;
use super::snapshot::{ActiveAssignment, GroupSnapshot};
use crate::error::SyncError;
use crate::store::models::ContentKind;
use crate::store::SyncStore;

/// A member lacking (part of) what a group assignment implies
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissingMember {
    pub student_id: Uuid,
    /// Weekday indices without a row; empty for courses and diets
    pub missing_days: Vec<i16>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Discrepancy {
    pub group_assignment_id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub content_name: String,
    pub missing: Vec<MissingMember>,
}

/// A content item whose audit could not be completed
#[derive(Debug, Clone, Serialize)]
pub struct SkippedAudit {
    pub group_assignment_id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub group_id: Uuid,
    pub consistent: bool,
    pub discrepancies: Vec<Discrepancy>,
    pub skipped: Vec<SkippedAudit>,
    pub audited_at: DateTime<Utc>,
}

impl AuditReport {
    fn consistent(group_id: Uuid) -> Self {
        Self {
            group_id,
            consistent: true,
            discrepancies: Vec::new(),
            skipped: Vec::new(),
            audited_at: Utc::now(),
        }
    }

    pub fn missing_count(&self) -> usize {
        self.discrepancies.iter().map(|d| d.missing.len()).sum()
    }
}

/// Consistency auditor - compares group-level assignments with member rows
pub struct Auditor {
    store: Arc<dyn SyncStore>,
}

impl Auditor {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    pub async fn audit(&self, snapshot: &GroupSnapshot) -> AuditReport {
        let group_id = snapshot.group_id();
        let members = snapshot.active_member_ids();
        let assignments: Vec<_> = snapshot
            .active_assignments()
            .into_iter()
            .filter(|a| a.kind.propagates())
            .collect();

        if members.is_empty() || assignments.is_empty() {
            debug!("Group {} has nothing to audit", group_id);
            return AuditReport::consistent(group_id);
        }

        let mut discrepancies = Vec::new();
        let mut skipped = Vec::new();

        for assignment in &assignments {
            match self.audit_assignment(assignment, &members).await {
                Ok(Some(discrepancy)) => discrepancies.push(discrepancy),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "❌ Audit of {} {} in group {} failed: {}",
                        assignment.kind, assignment.content_id, group_id, e
                    );
                    skipped.push(SkippedAudit {
                        group_assignment_id: assignment.id,
                        kind: assignment.kind,
                        content_id: assignment.content_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = AuditReport {
            group_id,
            consistent: discrepancies.is_empty(),
            discrepancies,
            skipped,
            audited_at: Utc::now(),
        };

        if report.consistent {
            info!("✓ Group {} is consistent ({} assignments)", group_id, assignments.len());
        } else {
            info!(
                "⚠️ Group {} has {} discrepancies ({} member gaps)",
                group_id,
                report.discrepancies.len(),
                report.missing_count()
            );
        }

        report
    }

    async fn audit_assignment(
        &self,
        assignment: &ActiveAssignment,
        members: &[Uuid],
    ) -> Result<Option<Discrepancy>, SyncError> {
        let missing = match assignment.kind {
            ContentKind::RoutineSingleDay => return Ok(None),
            ContentKind::Course => {
                let rows = self
                    .store
                    .list_active_course_access(assignment.content_id, members)
                    .await?;
                let sourced = rows
                    .iter()
                    .filter(|r| r.source_group_assignment_id == Some(assignment.id))
                    .count();
                debug!(
                    "Course {}: {} active grants, {} from this assignment",
                    assignment.content_id,
                    rows.len(),
                    sourced
                );
                let covered: HashSet<Uuid> = rows.into_iter().map(|r| r.student_id).collect();
                missing_members(members, &covered)
            }
            ContentKind::Diet => {
                let rows = self
                    .store
                    .list_active_diet_rows(assignment.content_id, members)
                    .await?;
                let covered: HashSet<Uuid> = rows.into_iter().map(|r| r.student_id).collect();
                missing_members(members, &covered)
            }
            ContentKind::RoutineFullWeek => {
                let week = routine_week(self.store.as_ref(), assignment.content_id).await?;
                let required: Vec<i16> = week.keys().copied().collect();

                let mut missing = Vec::new();
                for student_id in members {
                    let present: HashSet<i16> = self
                        .store
                        .list_day_assignments(*student_id, &required)
                        .await?
                        .into_iter()
                        .map(|r| r.day_index)
                        .collect();
                    let missing_days: Vec<i16> = required
                        .iter()
                        .copied()
                        .filter(|day| !present.contains(day))
                        .collect();
                    if !missing_days.is_empty() {
                        missing.push(MissingMember {
                            student_id: *student_id,
                            missing_days,
                        });
                    }
                }
                missing
            }
        };

        if missing.is_empty() {
            return Ok(None);
        }

        let content_name = self
            .store
            .content_title(assignment.kind, assignment.content_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| format!("{} {}", assignment.kind, assignment.content_id));

        Ok(Some(Discrepancy {
            group_assignment_id: assignment.id,
            kind: assignment.kind,
            content_id: assignment.content_id,
            content_name,
            missing,
        }))
    }
}

fn missing_members(members: &[Uuid], covered: &HashSet<Uuid>) -> Vec<MissingMember> {
    members
        .iter()
        .filter(|m| !covered.contains(m))
        .map(|m| MissingMember {
            student_id: *m,
            missing_days: Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{NewCourseAccess, NewGroupAssignment};
    use crate::store::MemoryStore;
    use crate::sync::primitive::fixtures::seed_full_week;
    use crate::sync::testing::{group_with_members, services};

    async fn assign(store: &MemoryStore, group_id: Uuid, kind: ContentKind, content_id: Uuid) -> Uuid {
        let row = NewGroupAssignment {
            group_id,
            kind,
            content_id,
            assigned_by: Uuid::new_v4(),
            start_date: None,
            end_date: None,
        };
        match kind {
            ContentKind::Diet => store.insert_diet_assignment(row).await.unwrap().id,
            _ => store.insert_content_assignment(row).await.unwrap().id,
        }
    }

    #[tokio::test]
    async fn test_empty_group_audits_consistent_without_reads() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 0).await;
        assign(&store, group_id, ContentKind::Course, Uuid::new_v4()).await;
        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        let services = services(&store);

        let reads_before = store.reads();
        let report = services.auditor.audit(&snapshot).await;
        assert!(report.consistent);
        assert_eq!(store.reads(), reads_before);

        let (other, _) = group_with_members(&store, 3).await;
        let snapshot = GroupSnapshot::load(store.as_ref(), other).await.unwrap();
        let reads_before = store.reads();
        let report = services.auditor.audit(&snapshot).await;
        assert!(report.consistent);
        assert_eq!(store.reads(), reads_before);
    }

    #[tokio::test]
    async fn test_reports_member_without_course_access() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 2).await;
        let course = Uuid::new_v4();
        let assignment = assign(&store, group_id, ContentKind::Course, course).await;
        store.set_title(course, "Mobility basics").await;
        store
            .insert_course_access(NewCourseAccess {
                student_id: members[0],
                course_id: course,
                notes: None,
                source_group_assignment_id: Some(assignment),
            })
            .await
            .unwrap();

        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        let report = services(&store).auditor.audit(&snapshot).await;

        assert!(!report.consistent);
        assert_eq!(report.discrepancies.len(), 1);
        let discrepancy = &report.discrepancies[0];
        assert_eq!(discrepancy.content_id, course);
        assert_eq!(discrepancy.group_assignment_id, assignment);
        assert_eq!(discrepancy.content_name, "Mobility basics");
        assert_eq!(
            discrepancy.missing,
            vec![MissingMember {
                student_id: members[1],
                missing_days: vec![],
            }]
        );
    }

    #[tokio::test]
    async fn test_reports_missing_weekdays() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 1).await;
        let routine = seed_full_week(&store).await;
        assign(&store, group_id, ContentKind::RoutineFullWeek, routine).await;
        store
            .delete_day_assignments(members[0], &[0, 1, 2, 3, 4, 5, 6])
            .await
            .unwrap();

        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        let report = services(&store).auditor.audit(&snapshot).await;

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].missing[0].missing_days, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(report.discrepancies[0].content_name.starts_with("routine-full-week"));
    }

    #[tokio::test]
    async fn test_read_failure_skips_item_without_flagging_it() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 2).await;
        let broken = Uuid::new_v4();
        let healthy = Uuid::new_v4();
        assign(&store, group_id, ContentKind::Course, broken).await;
        assign(&store, group_id, ContentKind::Diet, healthy).await;
        store.fail_reads_for_content(broken);

        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        let report = services(&store).auditor.audit(&snapshot).await;

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].content_id, broken);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].content_id, healthy);
    }

    #[tokio::test]
    async fn test_single_day_routines_are_not_audited() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 2).await;
        assign(&store, group_id, ContentKind::RoutineSingleDay, Uuid::new_v4()).await;

        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        let reads_before = store.reads();
        let report = services(&store).auditor.audit(&snapshot).await;
        assert!(report.consistent);
        assert!(report.skipped.is_empty());
        assert_eq!(store.reads(), reads_before);
    }
}
