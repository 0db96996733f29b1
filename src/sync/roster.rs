use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::models::{ContentKind, Group, GroupUpdate, NewGroup};
use crate::store::SyncStore;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RosterFailure {
    pub student_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MembershipChange {
    pub added: Vec<Uuid>,
    pub reactivated: Vec<Uuid>,
    pub unchanged: Vec<Uuid>,
    pub failed: Vec<RosterFailure>,
}

impl MembershipChange {
    pub fn joined(&self) -> usize {
        self.added.len() + self.reactivated.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub group_id: Uuid,
    pub student_id: Uuid,
    pub course_grants_revoked: u64,
    pub diet_rows_revoked: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnassignReport {
    pub group_assignment_id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub individual_rows_revoked: u64,
}

/// Membership changes and group-sourced cleanup
pub struct GroupRoster {
    store: Arc<dyn SyncStore>,
}

impl GroupRoster {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    pub async fn create_group(&self, group: NewGroup) -> Result<Group, SyncError> {
        check_group_fields(&group.name, group.course_start, group.course_end)?;
        let group = self.store.create_group(group).await?;
        info!("🆕 Created group {} ({})", group.id, group.name);
        Ok(group)
    }

    /// Apply a partial edit. Date order is checked against the stored
    /// values for whichever bound the edit leaves unset.
    pub async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> Result<Group, SyncError> {
        let current = self.ensure_group(group_id).await?;
        check_group_fields(
            update.name.as_deref().unwrap_or(&current.name),
            update.course_start.or(current.course_start),
            update.course_end.or(current.course_end),
        )?;

        let group = match self.store.update_group(group_id, update).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => return Err(SyncError::GroupNotFound(group_id)),
            Err(e) => return Err(e.into()),
        };
        info!("✏️ Updated group {} ({})", group.id, group.name);
        Ok(group)
    }

    pub async fn add_members(&self, group_id: Uuid, students: &[Uuid]) -> Result<MembershipChange, SyncError> {
        if students.is_empty() {
            return Err(SyncError::Validation("No students selected".to_string()));
        }
        self.ensure_group(group_id).await?;

        let mut change = MembershipChange::default();
        for student_id in students {
            match self.add_member(group_id, *student_id).await {
                Ok(Joined::Added) => change.added.push(*student_id),
                Ok(Joined::Reactivated) => change.reactivated.push(*student_id),
                Ok(Joined::AlreadyActive) => change.unchanged.push(*student_id),
                Err(e) => {
                    warn!("⚠️ Could not add student {} to group {}: {}", student_id, group_id, e);
                    change.failed.push(RosterFailure {
                        student_id: *student_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "👥 Group {}: {} joined, {} already members, {} failed",
            group_id,
            change.joined(),
            change.unchanged.len(),
            change.failed.len()
        );
        Ok(change)
    }

    async fn add_member(&self, group_id: Uuid, student_id: Uuid) -> Result<Joined, SyncError> {
        match self.store.find_membership(group_id, student_id).await? {
            Some(m) if m.active => Ok(Joined::AlreadyActive),
            Some(m) => {
                self.store.reactivate_membership(m.id).await?;
                Ok(Joined::Reactivated)
            }
            None => {
                self.store.insert_membership(group_id, student_id).await?;
                Ok(Joined::Added)
            }
        }
    }

    /// Deactivate a membership. With `cleanup`, also revoke the course and
    /// diet rows this group granted the student; grants from elsewhere stay.
    pub async fn remove_member(
        &self,
        group_id: Uuid,
        student_id: Uuid,
        cleanup: bool,
    ) -> Result<RemovalReport, SyncError> {
        let membership = self
            .store
            .find_membership(group_id, student_id)
            .await?
            .filter(|m| m.active)
            .ok_or(SyncError::MembershipNotFound { group_id, student_id })?;

        self.store.deactivate_membership(membership.id).await?;

        let mut report = RemovalReport {
            group_id,
            student_id,
            course_grants_revoked: 0,
            diet_rows_revoked: 0,
        };

        if cleanup {
            let course_sources: Vec<Uuid> = self
                .store
                .list_content_assignments(group_id, false)
                .await?
                .into_iter()
                .filter(|a| a.kind == ContentKind::Course)
                .map(|a| a.id)
                .collect();
            let diet_sources: Vec<Uuid> = self
                .store
                .list_diet_assignments(group_id, false)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect();

            if !course_sources.is_empty() {
                report.course_grants_revoked = self
                    .store
                    .deactivate_course_access_from_sources(Some(student_id), &course_sources)
                    .await?;
            }
            if !diet_sources.is_empty() {
                report.diet_rows_revoked = self
                    .store
                    .deactivate_diet_rows_from_sources(Some(student_id), &diet_sources)
                    .await?;
            }
        }

        info!(
            "👋 Student {} left group {} ({} course grants, {} diets revoked)",
            student_id, group_id, report.course_grants_revoked, report.diet_rows_revoked
        );
        Ok(report)
    }

    /// Deactivate an active group assignment and the member rows it produced.
    ///
    /// Rows produced by earlier assignments of the same content to this group
    /// are revoked too. Routine day rows are left alone. Superseded rows are
    /// history and cannot be unassigned.
    pub async fn unassign_content(&self, group_id: Uuid, assignment_id: Uuid) -> Result<UnassignReport, SyncError> {
        let content = self.store.list_content_assignments(group_id, false).await?;
        if let Some(row) = content.iter().find(|a| a.id == assignment_id && a.active) {
            self.store.deactivate_content_assignment(row.id).await?;

            let revoked = if row.kind == ContentKind::Course {
                let sources: Vec<Uuid> = content
                    .iter()
                    .filter(|a| a.kind == ContentKind::Course && a.content_id == row.content_id)
                    .map(|a| a.id)
                    .collect();
                self.store
                    .deactivate_course_access_from_sources(None, &sources)
                    .await?
            } else {
                0
            };

            info!("🗑️ Unassigned {} {} from group {}", row.kind, row.content_id, group_id);
            return Ok(UnassignReport {
                group_assignment_id: row.id,
                kind: row.kind,
                content_id: row.content_id,
                individual_rows_revoked: revoked,
            });
        }

        let diets = self.store.list_diet_assignments(group_id, false).await?;
        if let Some(row) = diets.iter().find(|a| a.id == assignment_id && a.active) {
            self.store.deactivate_diet_assignment(row.id).await?;

            let sources: Vec<Uuid> = diets
                .iter()
                .filter(|a| a.diet_id == row.diet_id)
                .map(|a| a.id)
                .collect();
            let revoked = self
                .store
                .deactivate_diet_rows_from_sources(None, &sources)
                .await?;

            info!("🗑️ Unassigned diet {} from group {}", row.diet_id, group_id);
            return Ok(UnassignReport {
                group_assignment_id: row.id,
                kind: ContentKind::Diet,
                content_id: row.diet_id,
                individual_rows_revoked: revoked,
            });
        }

        Err(SyncError::AssignmentNotFound(assignment_id))
    }

    async fn ensure_group(&self, group_id: Uuid) -> Result<Group, SyncError> {
        match self.store.get_group(group_id).await {
            Ok(group) => Ok(group),
            Err(e) if e.is_not_found() => Err(SyncError::GroupNotFound(group_id)),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_group_fields(
    name: &str,
    course_start: Option<NaiveDate>,
    course_end: Option<NaiveDate>,
) -> Result<(), SyncError> {
    if name.trim().is_empty() {
        return Err(SyncError::Validation("Group name is required".to_string()));
    }
    if let (Some(start), Some(end)) = (course_start, course_end) {
        if end < start {
            return Err(SyncError::Validation(
                "Course end date is before its start date".to_string(),
            ));
        }
    }
    Ok(())
}

enum Joined {
    Added,
    Reactivated,
    AlreadyActive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{NewCourseAccess, NewDietAssignment};
    use crate::store::MemoryStore;
    use crate::sync::dispatcher::AssignmentRequest;
    use crate::sync::primitive::WeekPolicy;
    use crate::sync::snapshot::GroupSnapshot;
    use crate::sync::testing::{group_with_members, services};

    async fn dispatch(store: &Arc<MemoryStore>, group_id: Uuid, kind: ContentKind, content_id: Uuid) -> Uuid {
        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        services(store)
            .dispatcher
            .dispatch(
                &snapshot,
                AssignmentRequest {
                    kind,
                    content_id,
                    assigned_by: Uuid::new_v4(),
                    start_date: None,
                    end_date: None,
                    week_policy: WeekPolicy::Overwrite,
                },
            )
            .await
            .unwrap()
            .group_assignment_id
    }

    #[tokio::test]
    async fn test_create_and_update_group() {
        let store = Arc::new(MemoryStore::new());
        let roster = services(&store).roster;
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();

        let err = roster
            .create_group(NewGroup {
                name: "  ".to_string(),
                description: None,
                objective: None,
                course_start: None,
                course_end: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let group = roster
            .create_group(NewGroup {
                name: "Spring cohort".to_string(),
                description: None,
                objective: None,
                course_start: Some(start),
                course_end: None,
            })
            .await
            .unwrap();

        // The stored start date still bounds an edit that only moves the end
        let err = roster
            .update_group(
                group.id,
                GroupUpdate {
                    course_end: NaiveDate::from_ymd_opt(2025, 12, 1),
                    ..GroupUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let updated = roster
            .update_group(
                group.id,
                GroupUpdate {
                    name: Some("Spring cohort B".to_string()),
                    course_end: NaiveDate::from_ymd_opt(2026, 3, 30),
                    ..GroupUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Spring cohort B");
        assert_eq!(updated.course_start, Some(start));

        let err = roster
            .update_group(Uuid::new_v4(), GroupUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::GroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_add_members_reactivates_and_skips_active() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 2).await;
        let roster = services(&store).roster;

        roster.remove_member(group_id, members[0], false).await.unwrap();
        let newcomer = Uuid::new_v4();

        let change = roster
            .add_members(group_id, &[members[0], members[1], newcomer])
            .await
            .unwrap();
        assert_eq!(change.reactivated, vec![members[0]]);
        assert_eq!(change.unchanged, vec![members[1]]);
        assert_eq!(change.added, vec![newcomer]);
        assert_eq!(store.list_memberships(group_id, true).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_add_members_validation() {
        let store = Arc::new(MemoryStore::new());
        let roster = services(&store).roster;

        let err = roster.add_members(Uuid::new_v4(), &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = roster.add_members(Uuid::new_v4(), &[Uuid::new_v4()]).await.unwrap_err();
        assert!(matches!(err, SyncError::GroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_member_revokes_only_group_grants() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 2).await;
        let leaving = members[0];
        let course = Uuid::new_v4();
        let diet = Uuid::new_v4();
        let bought = Uuid::new_v4();

        dispatch(&store, group_id, ContentKind::Course, course).await;
        dispatch(&store, group_id, ContentKind::Diet, diet).await;
        store
            .insert_course_access(NewCourseAccess {
                student_id: leaving,
                course_id: bought,
                notes: Some("Assigned via group elsewhere".into()),
                source_group_assignment_id: None,
            })
            .await
            .unwrap();

        let report = services(&store)
            .roster
            .remove_member(group_id, leaving, true)
            .await
            .unwrap();

        assert_eq!(report.course_grants_revoked, 1);
        assert_eq!(report.diet_rows_revoked, 1);
        assert!(store.find_active_course_access(leaving, course).await.unwrap().is_none());
        assert!(store.find_active_course_access(leaving, bought).await.unwrap().is_some());
        assert!(store.find_active_course_access(members[1], course).await.unwrap().is_some());
        assert!(store.find_active_diet_row(members[1], diet).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_unknown_member() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 1).await;
        let err = services(&store)
            .roster
            .remove_member(group_id, Uuid::new_v4(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MembershipNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unassign_diet_revokes_rows_from_every_assignment_of_it() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 1).await;
        let diet = Uuid::new_v4();
        let outsider = Uuid::new_v4();

        dispatch(&store, group_id, ContentKind::Diet, diet).await;
        // Re-assigning supersedes the first row; the member keeps the original diet row
        let current = dispatch(&store, group_id, ContentKind::Diet, diet).await;
        store
            .insert_diet_row(NewDietAssignment {
                student_id: outsider,
                diet_id: diet,
                observations: None,
                source_group_assignment_id: None,
            })
            .await
            .unwrap();

        let report = services(&store).roster.unassign_content(group_id, current).await.unwrap();

        assert_eq!(report.kind, ContentKind::Diet);
        assert_eq!(report.individual_rows_revoked, 1);
        assert!(store.find_active_diet_row(members[0], diet).await.unwrap().is_none());
        assert!(store.find_active_diet_row(outsider, diet).await.unwrap().is_some());
        assert!(store.list_diet_assignments(group_id, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unassign_superseded_assignment_keeps_live_grants() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 1).await;
        let course = Uuid::new_v4();

        let superseded = dispatch(&store, group_id, ContentKind::Course, course).await;
        let current = dispatch(&store, group_id, ContentKind::Course, course).await;

        let err = services(&store)
            .roster
            .unassign_content(group_id, superseded)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AssignmentNotFound(id) if id == superseded));

        let active = store.list_content_assignments(group_id, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, current);
        assert!(store.find_active_course_access(members[0], course).await.unwrap().is_some());

        let snapshot = GroupSnapshot::load(store.as_ref(), group_id).await.unwrap();
        let report = services(&store).auditor.audit(&snapshot).await;
        assert!(report.consistent);
    }

    #[tokio::test]
    async fn test_unassign_unknown_assignment() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 1).await;
        let err = services(&store)
            .roster
            .unassign_content(group_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AssignmentNotFound(_)));
    }
}
