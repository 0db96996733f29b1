use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::traits::SyncStore;
use crate::error::{StoreError, StoreResult};

const GROUP_COLUMNS: &str =
    "id, nombre, descripcion, objetivo, fecha_inicio_curso, fecha_fin_curso, activo, creado_en";
const MEMBERSHIP_COLUMNS: &str = "id, grupo_id, alumno_id, activo, fecha_ingreso, fecha_salida";
const CONTENT_COLUMNS: &str =
    "id, grupo_id, tipo, contenido_id, asignado_por, activo, fecha_asignacion, fecha_inicio, fecha_fin";
const DIET_GROUP_COLUMNS: &str =
    "id, grupo_id, dieta_id, asignado_por, activo, fecha_asignacion, fecha_inicio, fecha_fin";
const DAY_COLUMNS: &str = "id, alumno_id, dia_semana, sesion_id, fecha_inicio, origen_asignacion_grupo_id";
const COURSE_ACCESS_COLUMNS: &str =
    "id, alumno_id, curso_id, tipo_acceso, activo, notas, origen_asignacion_grupo_id";
const DIET_ROW_COLUMNS: &str =
    "id, alumno_id, dieta_id, activo, observaciones, origen_asignacion_grupo_id";

/// Postgres-backed store - the source of truth in production
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStore for PgStore {
    // ========== GROUPS ==========

    async fn get_group(&self, group_id: Uuid) -> StoreResult<Group> {
        sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM grupos_alumnos WHERE id = $1"
        ))
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("grupos_alumnos {}", group_id)))
    }

    async fn create_group(&self, group: NewGroup) -> StoreResult<Group> {
        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            INSERT INTO grupos_alumnos (nombre, descripcion, objetivo, fecha_inicio_curso, fecha_fin_curso)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group.name)
        .bind(group.description)
        .bind(group.objective)
        .bind(group.course_start)
        .bind(group.course_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(group)
    }

    async fn update_group(&self, group_id: Uuid, update: GroupUpdate) -> StoreResult<Group> {
        debug!("Updating group {}", group_id);
        sqlx::query_as::<_, Group>(&format!(
            r#"
            UPDATE grupos_alumnos
            SET nombre = COALESCE($2, nombre),
                descripcion = COALESCE($3, descripcion),
                objetivo = COALESCE($4, objetivo),
                fecha_inicio_curso = COALESCE($5, fecha_inicio_curso),
                fecha_fin_curso = COALESCE($6, fecha_fin_curso),
                activo = COALESCE($7, activo)
            WHERE id = $1
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(update.name)
        .bind(update.description)
        .bind(update.objective)
        .bind(update.course_start)
        .bind(update.course_end)
        .bind(update.active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("grupos_alumnos {}", group_id)))
    }

    async fn content_title(&self, kind: ContentKind, content_id: Uuid) -> StoreResult<Option<String>> {
        let sql = match kind {
            ContentKind::RoutineSingleDay | ContentKind::RoutineFullWeek => {
                "SELECT nombre FROM rutinas_de_verdad WHERE id = $1"
            }
            ContentKind::Course => "SELECT titulo FROM cursos WHERE id = $1",
            ContentKind::Diet => "SELECT nombre FROM dietas WHERE id = $1",
        };

        let title = sqlx::query_scalar::<_, String>(sql)
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(title)
    }

    // ========== MEMBERSHIPS ==========

    async fn list_memberships(&self, group_id: Uuid, active_only: bool) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query_as::<_, Membership>(&format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS}
            FROM asignaciones_grupos_alumnos
            WHERE grupo_id = $1 AND (activo OR NOT $2)
            ORDER BY fecha_ingreso, id
            "#
        ))
        .bind(group_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_membership(&self, group_id: Uuid, student_id: Uuid) -> StoreResult<Option<Membership>> {
        let row = sqlx::query_as::<_, Membership>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM asignaciones_grupos_alumnos WHERE grupo_id = $1 AND alumno_id = $2"
        ))
        .bind(group_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert_membership(&self, group_id: Uuid, student_id: Uuid) -> StoreResult<Membership> {
        let row = sqlx::query_as::<_, Membership>(&format!(
            r#"
            INSERT INTO asignaciones_grupos_alumnos (grupo_id, alumno_id)
            VALUES ($1, $2)
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn reactivate_membership(&self, membership_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE asignaciones_grupos_alumnos
            SET activo = TRUE, fecha_ingreso = NOW(), fecha_salida = NULL
            WHERE id = $1
            "#,
        )
        .bind(membership_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("asignaciones_grupos_alumnos {}", membership_id)));
        }
        Ok(())
    }

    async fn deactivate_membership(&self, membership_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE asignaciones_grupos_alumnos
            SET activo = FALSE, fecha_salida = NOW()
            WHERE id = $1 AND activo
            "#,
        )
        .bind(membership_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("asignaciones_grupos_alumnos {}", membership_id)));
        }
        Ok(())
    }

    // ========== GROUP ASSIGNMENTS ==========

    async fn list_content_assignments(
        &self,
        group_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<GroupContentAssignment>> {
        let rows = sqlx::query_as::<_, GroupContentAssignment>(&format!(
            r#"
            SELECT {CONTENT_COLUMNS}
            FROM asignaciones_grupos_contenido
            WHERE grupo_id = $1 AND (activo OR NOT $2)
            ORDER BY fecha_asignacion, id
            "#
        ))
        .bind(group_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_content_assignment(
        &self,
        assignment: NewGroupAssignment,
    ) -> StoreResult<GroupContentAssignment> {
        let row = sqlx::query_as::<_, GroupContentAssignment>(&format!(
            r#"
            INSERT INTO asignaciones_grupos_contenido
                (grupo_id, tipo, contenido_id, asignado_por, fecha_inicio, fecha_fin)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {CONTENT_COLUMNS}
            "#
        ))
        .bind(assignment.group_id)
        .bind(assignment.kind)
        .bind(assignment.content_id)
        .bind(assignment.assigned_by)
        .bind(assignment.start_date)
        .bind(assignment.end_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn deactivate_content_assignment(&self, assignment_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE asignaciones_grupos_contenido SET activo = FALSE WHERE id = $1")
            .bind(assignment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_diet_assignments(
        &self,
        group_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<GroupDietAssignment>> {
        let rows = sqlx::query_as::<_, GroupDietAssignment>(&format!(
            r#"
            SELECT {DIET_GROUP_COLUMNS}
            FROM asignaciones_dietas_grupos
            WHERE grupo_id = $1 AND (activo OR NOT $2)
            ORDER BY fecha_asignacion, id
            "#
        ))
        .bind(group_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_diet_assignment(
        &self,
        assignment: NewGroupAssignment,
    ) -> StoreResult<GroupDietAssignment> {
        let row = sqlx::query_as::<_, GroupDietAssignment>(&format!(
            r#"
            INSERT INTO asignaciones_dietas_grupos
                (grupo_id, dieta_id, asignado_por, fecha_inicio, fecha_fin)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {DIET_GROUP_COLUMNS}
            "#
        ))
        .bind(assignment.group_id)
        .bind(assignment.content_id)
        .bind(assignment.assigned_by)
        .bind(assignment.start_date)
        .bind(assignment.end_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn deactivate_diet_assignment(&self, assignment_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE asignaciones_dietas_grupos SET activo = FALSE WHERE id = $1")
            .bind(assignment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========== ROUTINES ==========

    async fn list_routine_day_sessions(&self, routine_id: Uuid) -> StoreResult<Vec<RoutineDaySession>> {
        let rows = sqlx::query_as::<_, RoutineDaySession>(
            "SELECT rutina_id, dia, sesion_id FROM rutinas_de_verdad_sesiones WHERE rutina_id = $1",
        )
        .bind(routine_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_day_assignments(
        &self,
        student_id: Uuid,
        day_indices: &[i16],
    ) -> StoreResult<Vec<DayAssignment>> {
        let rows = sqlx::query_as::<_, DayAssignment>(&format!(
            r#"
            SELECT {DAY_COLUMNS}
            FROM asignaciones
            WHERE alumno_id = $1 AND dia_semana = ANY($2)
            ORDER BY dia_semana
            "#
        ))
        .bind(student_id)
        .bind(day_indices)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn delete_day_assignments(&self, student_id: Uuid, day_indices: &[i16]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM asignaciones WHERE alumno_id = $1 AND dia_semana = ANY($2)")
            .bind(student_id)
            .bind(day_indices)
            .execute(&self.pool)
            .await?;

        debug!("Removed {} day rows for student {}", result.rows_affected(), student_id);
        Ok(result.rows_affected())
    }

    async fn insert_day_assignments(&self, rows: Vec<NewDayAssignment>) -> StoreResult<Vec<DayAssignment>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let students: Vec<Uuid> = rows.iter().map(|r| r.student_id).collect();
        let days: Vec<i16> = rows.iter().map(|r| r.day_index).collect();
        let sessions: Vec<Uuid> = rows.iter().map(|r| r.session_id).collect();
        let starts: Vec<chrono::NaiveDate> = rows.iter().map(|r| r.start_date).collect();
        let sources: Vec<Option<Uuid>> = rows.iter().map(|r| r.source_group_assignment_id).collect();

        let inserted = sqlx::query_as::<_, DayAssignment>(&format!(
            r#"
            INSERT INTO asignaciones (alumno_id, dia_semana, sesion_id, fecha_inicio, origen_asignacion_grupo_id)
            SELECT * FROM UNNEST($1::uuid[], $2::smallint[], $3::uuid[], $4::date[], $5::uuid[])
            RETURNING {DAY_COLUMNS}
            "#
        ))
        .bind(students)
        .bind(days)
        .bind(sessions)
        .bind(starts)
        .bind(sources)
        .fetch_all(&self.pool)
        .await?;

        Ok(inserted)
    }

    // ========== COURSE ACCESS ==========

    async fn find_active_course_access(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> StoreResult<Option<CourseAccess>> {
        let row = sqlx::query_as::<_, CourseAccess>(&format!(
            r#"
            SELECT {COURSE_ACCESS_COLUMNS}
            FROM acceso_cursos
            WHERE alumno_id = $1 AND curso_id = $2 AND activo
            LIMIT 1
            "#
        ))
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_active_course_access(
        &self,
        course_id: Uuid,
        student_ids: &[Uuid],
    ) -> StoreResult<Vec<CourseAccess>> {
        let rows = sqlx::query_as::<_, CourseAccess>(&format!(
            r#"
            SELECT {COURSE_ACCESS_COLUMNS}
            FROM acceso_cursos
            WHERE curso_id = $1 AND alumno_id = ANY($2) AND activo
            "#
        ))
        .bind(course_id)
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_course_access(&self, access: NewCourseAccess) -> StoreResult<CourseAccess> {
        let row = sqlx::query_as::<_, CourseAccess>(&format!(
            r#"
            INSERT INTO acceso_cursos (alumno_id, curso_id, tipo_acceso, notas, origen_asignacion_grupo_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COURSE_ACCESS_COLUMNS}
            "#
        ))
        .bind(access.student_id)
        .bind(access.course_id)
        .bind(GIFT_ACCESS)
        .bind(access.notes)
        .bind(access.source_group_assignment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn deactivate_course_access_from_sources(
        &self,
        student_id: Option<Uuid>,
        sources: &[Uuid],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE acceso_cursos
            SET activo = FALSE
            WHERE activo
              AND origen_asignacion_grupo_id = ANY($1)
              AND ($2::uuid IS NULL OR alumno_id = $2)
            "#,
        )
        .bind(sources)
        .bind(student_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ========== DIETS ==========

    async fn find_active_diet_row(
        &self,
        student_id: Uuid,
        diet_id: Uuid,
    ) -> StoreResult<Option<DietAssignment>> {
        let row = sqlx::query_as::<_, DietAssignment>(&format!(
            r#"
            SELECT {DIET_ROW_COLUMNS}
            FROM asignaciones_dietas_alumnos
            WHERE alumno_id = $1 AND dieta_id = $2 AND activo
            LIMIT 1
            "#
        ))
        .bind(student_id)
        .bind(diet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_active_diet_rows(
        &self,
        diet_id: Uuid,
        student_ids: &[Uuid],
    ) -> StoreResult<Vec<DietAssignment>> {
        let rows = sqlx::query_as::<_, DietAssignment>(&format!(
            r#"
            SELECT {DIET_ROW_COLUMNS}
            FROM asignaciones_dietas_alumnos
            WHERE dieta_id = $1 AND alumno_id = ANY($2) AND activo
            "#
        ))
        .bind(diet_id)
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_diet_row(&self, row: NewDietAssignment) -> StoreResult<DietAssignment> {
        let inserted = sqlx::query_as::<_, DietAssignment>(&format!(
            r#"
            INSERT INTO asignaciones_dietas_alumnos (alumno_id, dieta_id, observaciones, origen_asignacion_grupo_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {DIET_ROW_COLUMNS}
            "#
        ))
        .bind(row.student_id)
        .bind(row.diet_id)
        .bind(row.observations)
        .bind(row.source_group_assignment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn deactivate_diet_rows_from_sources(
        &self,
        student_id: Option<Uuid>,
        sources: &[Uuid],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE asignaciones_dietas_alumnos
            SET activo = FALSE
            WHERE activo
              AND origen_asignacion_grupo_id = ANY($1)
              AND ($2::uuid IS NULL OR alumno_id = $2)
            "#,
        )
        .bind(sources)
        .bind(student_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
