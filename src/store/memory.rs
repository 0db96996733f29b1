use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::traits::SyncStore;
use crate::error::{StoreError, StoreErrorCode, StoreResult};

#[derive(Default)]
struct Tables {
    groups: HashMap<Uuid, Group>,
    titles: HashMap<Uuid, String>,
    memberships: Vec<Membership>,
    content_assignments: Vec<GroupContentAssignment>,
    diet_assignments: Vec<GroupDietAssignment>,
    routine_sessions: Vec<RoutineDaySession>,
    day_assignments: Vec<DayAssignment>,
    course_access: Vec<CourseAccess>,
    diet_rows: Vec<DietAssignment>,
}

/// Injected failures, used to exercise partial-failure paths
#[derive(Default)]
struct FailurePlan {
    individual_writes_for: HashSet<Uuid>,
    reads_for_content: HashSet<Uuid>,
    group_inserts: bool,
    group_deactivations: bool,
}

/// In-memory store with the same semantics as [`super::PgStore`]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failures: Mutex<FailurePlan>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            failures: Mutex::new(FailurePlan::default()),
            reads: AtomicUsize::new(0),
        }
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn check_read(&self, content_id: Uuid) -> StoreResult<()> {
        self.count_read();
        if self.failures.lock().reads_for_content.contains(&content_id) {
            return Err(StoreError::new(
                StoreErrorCode::Unavailable,
                format!("injected read failure for content {}", content_id),
            ));
        }
        Ok(())
    }

    fn check_individual_write(&self, student_id: Uuid) -> StoreResult<()> {
        if self.failures.lock().individual_writes_for.contains(&student_id) {
            return Err(StoreError::general(format!(
                "injected write failure for student {}",
                student_id
            )));
        }
        Ok(())
    }

    fn check_group_insert(&self) -> StoreResult<()> {
        if self.failures.lock().group_inserts {
            return Err(StoreError::new(
                StoreErrorCode::Unavailable,
                "injected group insert failure",
            ));
        }
        Ok(())
    }

    fn check_group_deactivation(&self) -> StoreResult<()> {
        if self.failures.lock().group_deactivations {
            return Err(StoreError::new(
                StoreErrorCode::Unavailable,
                "injected group deactivation failure",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Number of read calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every individual write for `student_id` fails until cleared.
    pub fn fail_individual_writes_for(&self, student_id: Uuid) {
        self.failures.lock().individual_writes_for.insert(student_id);
    }

    /// Every read touching `content_id` fails until cleared.
    pub fn fail_reads_for_content(&self, content_id: Uuid) {
        self.failures.lock().reads_for_content.insert(content_id);
    }

    pub fn fail_group_writes(&self, fail: bool) {
        let mut failures = self.failures.lock();
        failures.group_inserts = fail;
        failures.group_deactivations = fail;
    }

    pub fn fail_group_inserts(&self, fail: bool) {
        self.failures.lock().group_inserts = fail;
    }

    pub fn fail_group_deactivations(&self, fail: bool) {
        self.failures.lock().group_deactivations = fail;
    }

    pub fn clear_failures(&self) {
        *self.failures.lock() = FailurePlan::default();
    }

    pub async fn set_title(&self, content_id: Uuid, title: &str) {
        self.tables.write().await.titles.insert(content_id, title.to_string());
    }

    /// Register a routine's weekday→session mapping.
    pub async fn seed_routine(&self, routine_id: Uuid, days: &[(&str, Uuid)]) {
        let mut tables = self.tables.write().await;
        tables.routine_sessions.retain(|s| s.routine_id != routine_id);
        for (day, session_id) in days {
            tables.routine_sessions.push(RoutineDaySession {
                routine_id,
                day: day.to_string(),
                session_id: *session_id,
            });
        }
    }

    /// Snapshot of every day row a student holds, ordered by day.
    pub async fn day_rows(&self, student_id: Uuid) -> Vec<DayAssignment> {
        let tables = self.tables.read().await;
        let mut rows: Vec<DayAssignment> = tables
            .day_assignments
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.day_index);
        rows
    }

    pub async fn course_rows(&self, student_id: Uuid, course_id: Uuid) -> Vec<CourseAccess> {
        let tables = self.tables.read().await;
        tables
            .course_access
            .iter()
            .filter(|r| r.student_id == student_id && r.course_id == course_id)
            .cloned()
            .collect()
    }

    pub async fn diet_rows(&self, student_id: Uuid, diet_id: Uuid) -> Vec<DietAssignment> {
        let tables = self.tables.read().await;
        tables
            .diet_rows
            .iter()
            .filter(|r| r.student_id == student_id && r.diet_id == diet_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn get_group(&self, group_id: Uuid) -> StoreResult<Group> {
        self.count_read();
        let tables = self.tables.read().await;
        tables
            .groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("grupos_alumnos {}", group_id)))
    }

    async fn create_group(&self, group: NewGroup) -> StoreResult<Group> {
        let group = Group {
            id: Uuid::new_v4(),
            name: group.name,
            description: group.description,
            objective: group.objective,
            course_start: group.course_start,
            course_end: group.course_end,
            active: true,
            created_at: Utc::now(),
        };
        let mut tables = self.tables.write().await;
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> StoreResult<Group> {
        let mut tables = self.tables.write().await;
        let group = tables
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StoreError::not_found(format!("grupos_alumnos {}", group_id)))?;
        if let Some(name) = update.name {
            group.name = name;
        }
        if update.description.is_some() {
            group.description = update.description;
        }
        if update.objective.is_some() {
            group.objective = update.objective;
        }
        if update.course_start.is_some() {
            group.course_start = update.course_start;
        }
        if update.course_end.is_some() {
            group.course_end = update.course_end;
        }
        if let Some(active) = update.active {
            group.active = active;
        }
        Ok(group.clone())
    }

    async fn content_title(&self, _kind: ContentKind, content_id: Uuid) -> StoreResult<Option<String>> {
        self.check_read(content_id)?;
        let tables = self.tables.read().await;
        Ok(tables.titles.get(&content_id).cloned())
    }

    async fn list_memberships(&self, group_id: Uuid, active_only: bool) -> StoreResult<Vec<Membership>> {
        self.count_read();
        let tables = self.tables.read().await;
        let mut rows: Vec<Membership> = tables
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id && (m.active || !active_only))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.joined_at);
        Ok(rows)
    }

    async fn find_membership(&self, group_id: Uuid, student_id: Uuid) -> StoreResult<Option<Membership>> {
        self.count_read();
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .iter()
            .find(|m| m.group_id == group_id && m.student_id == student_id)
            .cloned())
    }

    async fn insert_membership(&self, group_id: Uuid, student_id: Uuid) -> StoreResult<Membership> {
        self.check_individual_write(student_id)?;
        let mut tables = self.tables.write().await;
        if !tables.groups.contains_key(&group_id) {
            return Err(StoreError::not_found(format!("grupos_alumnos {}", group_id)));
        }
        if tables
            .memberships
            .iter()
            .any(|m| m.group_id == group_id && m.student_id == student_id)
        {
            return Err(StoreError::new(
                StoreErrorCode::Conflict,
                format!("student {} already recorded in group {}", student_id, group_id),
            ));
        }
        let membership = Membership {
            id: Uuid::new_v4(),
            group_id,
            student_id,
            active: true,
            joined_at: Utc::now(),
            left_at: None,
        };
        tables.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn reactivate_membership(&self, membership_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let membership = tables
            .memberships
            .iter_mut()
            .find(|m| m.id == membership_id)
            .ok_or_else(|| StoreError::not_found(format!("asignaciones_grupos_alumnos {}", membership_id)))?;
        membership.active = true;
        membership.joined_at = Utc::now();
        membership.left_at = None;
        Ok(())
    }

    async fn deactivate_membership(&self, membership_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let membership = tables
            .memberships
            .iter_mut()
            .find(|m| m.id == membership_id && m.active)
            .ok_or_else(|| StoreError::not_found(format!("asignaciones_grupos_alumnos {}", membership_id)))?;
        membership.active = false;
        membership.left_at = Some(Utc::now());
        Ok(())
    }

    async fn list_content_assignments(
        &self,
        group_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<GroupContentAssignment>> {
        self.count_read();
        let tables = self.tables.read().await;
        Ok(tables
            .content_assignments
            .iter()
            .filter(|a| a.group_id == group_id && (a.active || !active_only))
            .cloned()
            .collect())
    }

    async fn insert_content_assignment(
        &self,
        assignment: NewGroupAssignment,
    ) -> StoreResult<GroupContentAssignment> {
        self.check_group_insert()?;
        if assignment.kind == ContentKind::Diet {
            return Err(StoreError::general("diets belong in asignaciones_dietas_grupos"));
        }
        let row = GroupContentAssignment {
            id: Uuid::new_v4(),
            group_id: assignment.group_id,
            kind: assignment.kind,
            content_id: assignment.content_id,
            assigned_by: assignment.assigned_by,
            active: true,
            assigned_at: Utc::now(),
            start_date: assignment.start_date,
            end_date: assignment.end_date,
        };
        self.tables.write().await.content_assignments.push(row.clone());
        Ok(row)
    }

    async fn deactivate_content_assignment(&self, assignment_id: Uuid) -> StoreResult<()> {
        self.check_group_deactivation()?;
        let mut tables = self.tables.write().await;
        if let Some(row) = tables.content_assignments.iter_mut().find(|a| a.id == assignment_id) {
            row.active = false;
        }
        Ok(())
    }

    async fn list_diet_assignments(
        &self,
        group_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<GroupDietAssignment>> {
        self.count_read();
        let tables = self.tables.read().await;
        Ok(tables
            .diet_assignments
            .iter()
            .filter(|a| a.group_id == group_id && (a.active || !active_only))
            .cloned()
            .collect())
    }

    async fn insert_diet_assignment(
        &self,
        assignment: NewGroupAssignment,
    ) -> StoreResult<GroupDietAssignment> {
        self.check_group_insert()?;
        let row = GroupDietAssignment {
            id: Uuid::new_v4(),
            group_id: assignment.group_id,
            diet_id: assignment.content_id,
            assigned_by: assignment.assigned_by,
            active: true,
            assigned_at: Utc::now(),
            start_date: assignment.start_date,
            end_date: assignment.end_date,
        };
        self.tables.write().await.diet_assignments.push(row.clone());
        Ok(row)
    }

    async fn deactivate_diet_assignment(&self, assignment_id: Uuid) -> StoreResult<()> {
        self.check_group_deactivation()?;
        let mut tables = self.tables.write().await;
        if let Some(row) = tables.diet_assignments.iter_mut().find(|a| a.id == assignment_id) {
            row.active = false;
        }
        Ok(())
    }

    async fn list_routine_day_sessions(&self, routine_id: Uuid) -> StoreResult<Vec<RoutineDaySession>> {
        self.check_read(routine_id)?;
        let tables = self.tables.read().await;
        Ok(tables
            .routine_sessions
            .iter()
            .filter(|s| s.routine_id == routine_id)
            .cloned()
            .collect())
    }

    async fn list_day_assignments(
        &self,
        student_id: Uuid,
        day_indices: &[i16],
    ) -> StoreResult<Vec<DayAssignment>> {
        self.count_read();
        let tables = self.tables.read().await;
        let mut rows: Vec<DayAssignment> = tables
            .day_assignments
            .iter()
            .filter(|r| r.student_id == student_id && day_indices.contains(&r.day_index))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.day_index);
        Ok(rows)
    }

    async fn delete_day_assignments(&self, student_id: Uuid, day_indices: &[i16]) -> StoreResult<u64> {
        self.check_individual_write(student_id)?;
        let mut tables = self.tables.write().await;
        let before = tables.day_assignments.len();
        tables
            .day_assignments
            .retain(|r| !(r.student_id == student_id && day_indices.contains(&r.day_index)));
        Ok((before - tables.day_assignments.len()) as u64)
    }

    async fn insert_day_assignments(&self, rows: Vec<NewDayAssignment>) -> StoreResult<Vec<DayAssignment>> {
        for row in &rows {
            self.check_individual_write(row.student_id)?;
        }
        let inserted: Vec<DayAssignment> = rows
            .into_iter()
            .map(|r| DayAssignment {
                id: Uuid::new_v4(),
                student_id: r.student_id,
                day_index: r.day_index,
                session_id: r.session_id,
                start_date: r.start_date,
                source_group_assignment_id: r.source_group_assignment_id,
            })
            .collect();
        self.tables
            .write()
            .await
            .day_assignments
            .extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn find_active_course_access(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> StoreResult<Option<CourseAccess>> {
        self.check_read(course_id)?;
        let tables = self.tables.read().await;
        Ok(tables
            .course_access
            .iter()
            .find(|r| r.student_id == student_id && r.course_id == course_id && r.active)
            .cloned())
    }

    async fn list_active_course_access(
        &self,
        course_id: Uuid,
        student_ids: &[Uuid],
    ) -> StoreResult<Vec<CourseAccess>> {
        self.check_read(course_id)?;
        let tables = self.tables.read().await;
        Ok(tables
            .course_access
            .iter()
            .filter(|r| r.course_id == course_id && r.active && student_ids.contains(&r.student_id))
            .cloned()
            .collect())
    }

    async fn insert_course_access(&self, access: NewCourseAccess) -> StoreResult<CourseAccess> {
        self.check_individual_write(access.student_id)?;
        let mut tables = self.tables.write().await;
        if tables
            .course_access
            .iter()
            .any(|r| r.student_id == access.student_id && r.course_id == access.course_id && r.active)
        {
            return Err(StoreError::new(
                StoreErrorCode::Conflict,
                "duplicate key value violates unique constraint \"uq_acceso_cursos_activo\"",
            ));
        }
        let row = CourseAccess {
            id: Uuid::new_v4(),
            student_id: access.student_id,
            course_id: access.course_id,
            access_type: GIFT_ACCESS.to_string(),
            active: true,
            notes: access.notes,
            source_group_assignment_id: access.source_group_assignment_id,
        };
        tables.course_access.push(row.clone());
        Ok(row)
    }

    async fn deactivate_course_access_from_sources(
        &self,
        student_id: Option<Uuid>,
        sources: &[Uuid],
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for row in tables.course_access.iter_mut() {
            let sourced = row
                .source_group_assignment_id
                .map(|s| sources.contains(&s))
                .unwrap_or(false);
            if row.active && sourced && student_id.map_or(true, |s| s == row.student_id) {
                row.active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_active_diet_row(
        &self,
        student_id: Uuid,
        diet_id: Uuid,
    ) -> StoreResult<Option<DietAssignment>> {
        self.check_read(diet_id)?;
        let tables = self.tables.read().await;
        Ok(tables
            .diet_rows
            .iter()
            .find(|r| r.student_id == student_id && r.diet_id == diet_id && r.active)
            .cloned())
    }

    async fn list_active_diet_rows(
        &self,
        diet_id: Uuid,
        student_ids: &[Uuid],
    ) -> StoreResult<Vec<DietAssignment>> {
        self.check_read(diet_id)?;
        let tables = self.tables.read().await;
        Ok(tables
            .diet_rows
            .iter()
            .filter(|r| r.diet_id == diet_id && r.active && student_ids.contains(&r.student_id))
            .cloned()
            .collect())
    }

    async fn insert_diet_row(&self, row: NewDietAssignment) -> StoreResult<DietAssignment> {
        self.check_individual_write(row.student_id)?;
        let mut tables = self.tables.write().await;
        if tables
            .diet_rows
            .iter()
            .any(|r| r.student_id == row.student_id && r.diet_id == row.diet_id && r.active)
        {
            return Err(StoreError::new(
                StoreErrorCode::Conflict,
                "duplicate key value violates unique constraint \"uq_dietas_alumnos_activo\"",
            ));
        }
        let inserted = DietAssignment {
            id: Uuid::new_v4(),
            student_id: row.student_id,
            diet_id: row.diet_id,
            active: true,
            observations: row.observations,
            source_group_assignment_id: row.source_group_assignment_id,
        };
        tables.diet_rows.push(inserted.clone());
        Ok(inserted)
    }

    async fn deactivate_diet_rows_from_sources(
        &self,
        student_id: Option<Uuid>,
        sources: &[Uuid],
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for row in tables.diet_rows.iter_mut() {
            let sourced = row
                .source_group_assignment_id
                .map(|s| sources.contains(&s))
                .unwrap_or(false);
            if row.active && sourced && student_id.map_or(true, |s| s == row.student_id) {
                row.active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
