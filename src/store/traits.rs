use async_trait::async_trait;
use uuid::Uuid;

use super::models::*;
use crate::error::StoreResult;

/// Data store seam used by the synchronization subsystem.
///
/// Each method is one remote call; nothing here is transactional across
/// calls. Reads marked `active` only return rows whose `activo` flag is set.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // ========== GROUPS ==========

    async fn get_group(&self, group_id: Uuid) -> StoreResult<Group>;

    async fn create_group(&self, group: NewGroup) -> StoreResult<Group>;

    /// Fails with `NotFound` when the group does not exist.
    async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> StoreResult<Group>;

    /// Display name of a routine, course or diet, when the catalog knows it.
    async fn content_title(&self, _kind: ContentKind, _content_id: Uuid) -> StoreResult<Option<String>> {
        Ok(None)
    }

    // ========== MEMBERSHIPS ==========

    async fn list_memberships(&self, group_id: Uuid, active_only: bool) -> StoreResult<Vec<Membership>>;

    async fn find_membership(&self, group_id: Uuid, student_id: Uuid) -> StoreResult<Option<Membership>>;

    async fn insert_membership(&self, group_id: Uuid, student_id: Uuid) -> StoreResult<Membership>;

    async fn reactivate_membership(&self, membership_id: Uuid) -> StoreResult<()>;

    async fn deactivate_membership(&self, membership_id: Uuid) -> StoreResult<()>;

    // ========== GROUP ASSIGNMENTS ==========

    async fn list_content_assignments(
        &self,
        group_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<GroupContentAssignment>>;

    async fn insert_content_assignment(
        &self,
        assignment: NewGroupAssignment,
    ) -> StoreResult<GroupContentAssignment>;

    async fn deactivate_content_assignment(&self, assignment_id: Uuid) -> StoreResult<()>;

    async fn list_diet_assignments(
        &self,
        group_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<GroupDietAssignment>>;

    async fn insert_diet_assignment(
        &self,
        assignment: NewGroupAssignment,
    ) -> StoreResult<GroupDietAssignment>;

    async fn deactivate_diet_assignment(&self, assignment_id: Uuid) -> StoreResult<()>;

    // ========== ROUTINES ==========

    async fn list_routine_day_sessions(&self, routine_id: Uuid) -> StoreResult<Vec<RoutineDaySession>>;

    async fn list_day_assignments(
        &self,
        student_id: Uuid,
        day_indices: &[i16],
    ) -> StoreResult<Vec<DayAssignment>>;

    /// Returns the number of rows removed.
    async fn delete_day_assignments(&self, student_id: Uuid, day_indices: &[i16]) -> StoreResult<u64>;

    async fn insert_day_assignments(&self, rows: Vec<NewDayAssignment>) -> StoreResult<Vec<DayAssignment>>;

    // ========== COURSE ACCESS ==========

    async fn find_active_course_access(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> StoreResult<Option<CourseAccess>>;

    async fn list_active_course_access(
        &self,
        course_id: Uuid,
        student_ids: &[Uuid],
    ) -> StoreResult<Vec<CourseAccess>>;

    async fn insert_course_access(&self, access: NewCourseAccess) -> StoreResult<CourseAccess>;

    /// Deactivate active grants produced by any of `sources`, optionally for one student.
    async fn deactivate_course_access_from_sources(
        &self,
        student_id: Option<Uuid>,
        sources: &[Uuid],
    ) -> StoreResult<u64>;

    // ========== DIETS ==========

    async fn find_active_diet_row(
        &self,
        student_id: Uuid,
        diet_id: Uuid,
    ) -> StoreResult<Option<DietAssignment>>;

    async fn list_active_diet_rows(
        &self,
        diet_id: Uuid,
        student_ids: &[Uuid],
    ) -> StoreResult<Vec<DietAssignment>>;

    async fn insert_diet_row(&self, row: NewDietAssignment) -> StoreResult<DietAssignment>;

    async fn deactivate_diet_rows_from_sources(
        &self,
        student_id: Option<Uuid>,
        sources: &[Uuid],
    ) -> StoreResult<u64>;
}
