use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::outcome::{BatchOutcome, MemberResult};
use crate::error::SyncError;
use crate::store::models::*;
use crate::store::SyncStore;

/// How a full-week routine treats the days a student already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekPolicy {
    /// Wipe all seven days, then write the routine's days. Last assignment wins.
    #[default]
    Overwrite,
    /// Only fill days the student has nothing on.
    Merge,
}

/// One group-level assignment being copied onto members
#[derive(Debug, Clone)]
pub struct PropagationTarget {
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub source_assignment_id: Uuid,
    pub group_name: String,
    pub start_date: NaiveDate,
}

/// Per-member assignment step shared by the dispatcher and the reconciler.
pub struct AssignmentPrimitive {
    store: Arc<dyn SyncStore>,
}

impl AssignmentPrimitive {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        target: &PropagationTarget,
        student_id: Uuid,
        policy: WeekPolicy,
    ) -> Result<MemberResult, SyncError> {
        match target.kind {
            ContentKind::Course => self.grant_course(target, student_id).await,
            ContentKind::Diet => self.grant_diet(target, student_id).await,
            ContentKind::RoutineFullWeek => self.place_week(target, student_id, policy).await,
            ContentKind::RoutineSingleDay => Ok(MemberResult::Skipped),
        }
    }

    /// Apply `target` to every student, at most `max_concurrent` writes in flight.
    ///
    /// Results are folded in member order whatever the concurrency.
    pub async fn apply_to_members(
        &self,
        target: &PropagationTarget,
        students: &[Uuid],
        policy: WeekPolicy,
        max_concurrent: usize,
    ) -> BatchOutcome {
        let results: Vec<(Uuid, Result<MemberResult, SyncError>)> = stream::iter(students.iter().copied())
            .map(|student_id| async move { (student_id, self.apply(target, student_id, policy).await) })
            .buffered(max_concurrent.max(1))
            .collect()
            .await;

        let mut outcome = BatchOutcome::default();
        for (student_id, result) in results {
            if let Err(e) = &result {
                warn!(
                    "⚠️ {} {} not applied to student {}: {}",
                    target.kind, target.content_id, student_id, e
                );
            }
            outcome.record(student_id, target.kind, target.content_id, result);
        }
        outcome
    }

    async fn grant_course(&self, target: &PropagationTarget, student_id: Uuid) -> Result<MemberResult, SyncError> {
        if self
            .store
            .find_active_course_access(student_id, target.content_id)
            .await?
            .is_some()
        {
            debug!("Student {} already has course {}", student_id, target.content_id);
            return Ok(MemberResult::Unchanged);
        }

        let insert = self
            .store
            .insert_course_access(NewCourseAccess {
                student_id,
                course_id: target.content_id,
                notes: Some(provenance_note(&target.group_name)),
                source_group_assignment_id: Some(target.source_assignment_id),
            })
            .await;

        match insert {
            Ok(_) => Ok(MemberResult::Created(1)),
            // Another writer got there between the check and the insert
            Err(e) if e.is_conflict() => Ok(MemberResult::Unchanged),
            Err(e) => Err(e.into()),
        }
    }

    async fn grant_diet(&self, target: &PropagationTarget, student_id: Uuid) -> Result<MemberResult, SyncError> {
        if self
            .store
            .find_active_diet_row(student_id, target.content_id)
            .await?
            .is_some()
        {
            debug!("Student {} already follows diet {}", student_id, target.content_id);
            return Ok(MemberResult::Unchanged);
        }

        let insert = self
            .store
            .insert_diet_row(NewDietAssignment {
                student_id,
                diet_id: target.content_id,
                observations: Some(provenance_note(&target.group_name)),
                source_group_assignment_id: Some(target.source_assignment_id),
            })
            .await;

        match insert {
            Ok(_) => Ok(MemberResult::Created(1)),
            Err(e) if e.is_conflict() => Ok(MemberResult::Unchanged),
            Err(e) => Err(e.into()),
        }
    }

    async fn place_week(
        &self,
        target: &PropagationTarget,
        student_id: Uuid,
        policy: WeekPolicy,
    ) -> Result<MemberResult, SyncError> {
        let week = routine_week(self.store.as_ref(), target.content_id).await?;

        let days: Vec<(i16, Uuid)> = match policy {
            WeekPolicy::Overwrite => {
                let removed = self.store.delete_day_assignments(student_id, &WEEK_DAYS).await?;
                debug!("Cleared {} day rows of student {} before full-week write", removed, student_id);
                week.into_iter().collect()
            }
            WeekPolicy::Merge => {
                let wanted: Vec<i16> = week.keys().copied().collect();
                let taken: Vec<i16> = self
                    .store
                    .list_day_assignments(student_id, &wanted)
                    .await?
                    .into_iter()
                    .map(|r| r.day_index)
                    .collect();
                week.into_iter()
                    .filter(|(day, _)| !taken.contains(day))
                    .collect()
            }
        };

        if days.is_empty() {
            return Ok(MemberResult::Unchanged);
        }

        let rows = days
            .into_iter()
            .map(|(day_index, session_id)| NewDayAssignment {
                student_id,
                day_index,
                session_id,
                start_date: target.start_date,
                source_group_assignment_id: Some(target.source_assignment_id),
            })
            .collect();

        let inserted = self.store.insert_day_assignments(rows).await?;
        Ok(MemberResult::Created(inserted.len()))
    }
}

/// The routine's weekday index → session map. Errors on unknown names or an empty routine.
pub async fn routine_week(store: &dyn SyncStore, routine_id: Uuid) -> Result<BTreeMap<i16, Uuid>, SyncError> {
    let sessions = store.list_routine_day_sessions(routine_id).await?;

    let mut week = BTreeMap::new();
    for session in sessions {
        let day = weekday_index(&session.day).ok_or_else(|| SyncError::UnknownWeekday {
            routine_id,
            day: session.day.clone(),
        })?;
        week.insert(day, session.session_id);
    }

    if week.is_empty() {
        return Err(SyncError::EmptyRoutine(routine_id));
    }
    Ok(week)
}
