use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::models::*;
use crate::store::SyncStore;

/// Everything the sync operations need to know about one group, read once.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub group: Group,
    pub members: Vec<Membership>,
    pub content_assignments: Vec<GroupContentAssignment>,
    pub diet_assignments: Vec<GroupDietAssignment>,
}

/// A group-level assignment from either table, reduced to what propagation needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAssignment {
    pub id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub start_date: Option<NaiveDate>,
}

impl GroupSnapshot {
    /// Load the group with its active members and active assignments.
    pub async fn load(store: &dyn SyncStore, group_id: Uuid) -> Result<Self, SyncError> {
        let group = store.get_group(group_id).await.map_err(|e| {
            if e.is_not_found() {
                SyncError::GroupNotFound(group_id)
            } else {
                SyncError::Store(e)
            }
        })?;

        let members = store.list_memberships(group_id, true).await?;
        let content_assignments = store.list_content_assignments(group_id, true).await?;
        let diet_assignments = store.list_diet_assignments(group_id, true).await?;

        Ok(Self {
            group,
            members,
            content_assignments,
            diet_assignments,
        })
    }

    pub fn group_id(&self) -> Uuid {
        self.group.id
    }

    pub fn active_member_ids(&self) -> Vec<Uuid> {
        self.members
            .iter()
            .filter(|m| m.active)
            .map(|m| m.student_id)
            .collect()
    }

    pub fn is_member(&self, student_id: Uuid) -> bool {
        self.members.iter().any(|m| m.active && m.student_id == student_id)
    }

    /// Active content rows first, then active diet rows, each in assignment order.
    pub fn active_assignments(&self) -> Vec<ActiveAssignment> {
        let content = self
            .content_assignments
            .iter()
            .filter(|a| a.active)
            .map(|a| ActiveAssignment {
                id: a.id,
                kind: a.kind,
                content_id: a.content_id,
                start_date: a.start_date,
            });

        let diets = self
            .diet_assignments
            .iter()
            .filter(|a| a.active)
            .map(|a| ActiveAssignment {
                id: a.id,
                kind: ContentKind::Diet,
                content_id: a.diet_id,
                start_date: a.start_date,
            });

        content.chain(diets).collect()
    }

    pub fn find_assignment(&self, assignment_id: Uuid) -> Option<ActiveAssignment> {
        self.active_assignments()
            .into_iter()
            .find(|a| a.id == assignment_id)
    }

    /// True when there is something for the auditor to look at.
    pub fn has_work(&self) -> bool {
        !self.active_member_ids().is_empty() && !self.active_assignments().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_inactive_rows_are_ignored() {
        let group = group("Morning crew");
        let active = Uuid::new_v4();
        let snapshot = GroupSnapshot {
            members: vec![
                membership(group.id, active, true),
                membership(group.id, Uuid::new_v4(), false),
            ],
            content_assignments: vec![
                content_assignment(group.id, ContentKind::Course, true),
                content_assignment(group.id, ContentKind::RoutineFullWeek, false),
            ],
            diet_assignments: vec![],
            group,
        };

        assert_eq!(snapshot.active_member_ids(), vec![active]);
        assert_eq!(snapshot.active_assignments().len(), 1);
        assert!(snapshot.has_work());
    }

    #[test]
    fn test_no_members_means_no_work() {
        let group = group("Empty");
        let snapshot = GroupSnapshot {
            members: vec![],
            content_assignments: vec![content_assignment(group.id, ContentKind::Course, true)],
            diet_assignments: vec![],
            group,
        };
        assert!(!snapshot.has_work());
    }

    #[tokio::test]
    async fn test_load_unknown_group() {
        let store = MemoryStore::new();
        let missing = Uuid::new_v4();
        let err = GroupSnapshot::load(&store, missing).await.unwrap_err();
        assert!(matches!(err, SyncError::GroupNotFound(id) if id == missing));
    }
}
