use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of content a group can be bulk-assigned to.
///
/// Diets live in their own group table, the other kinds share
/// `asignaciones_grupos_contenido`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "tipo_contenido", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    RoutineSingleDay,
    RoutineFullWeek,
    Course,
    Diet,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine-single-day" => Ok(ContentKind::RoutineSingleDay),
            "routine-full-week" => Ok(ContentKind::RoutineFullWeek),
            "course" => Ok(ContentKind::Course),
            "diet" => Ok(ContentKind::Diet),
            other => Err(format!("unknown content kind: {}", other)),
        }
    }
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::RoutineSingleDay => "routine-single-day",
            ContentKind::RoutineFullWeek => "routine-full-week",
            ContentKind::Course => "course",
            ContentKind::Diet => "diet",
        }
    }

    /// Whether a group assignment of this kind is copied onto every member.
    /// Single-day routines are placed by hand, one day at a time.
    pub fn propagates(&self) -> bool {
        !matches!(self, ContentKind::RoutineSingleDay)
    }
}

/// Day indices used by individual routine rows, monday first.
pub const WEEK_DAYS: [i16; 7] = [0, 1, 2, 3, 4, 5, 6];

/// Translate a weekday name from the routine session table into its index.
pub fn weekday_index(name: &str) -> Option<i16> {
    match name.trim().to_ascii_lowercase().as_str() {
        "monday" => Some(0),
        "tuesday" => Some(1),
        "wednesday" => Some(2),
        "thursday" => Some(3),
        "friday" => Some(4),
        "saturday" => Some(5),
        "sunday" => Some(6),
        _ => None,
    }
}

///Student group
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: Uuid,
    #[sqlx(rename = "nombre")]
    pub name: String,
    #[sqlx(rename = "descripcion")]
    pub description: Option<String>,
    #[sqlx(rename = "objetivo")]
    pub objective: Option<String>,
    #[sqlx(rename = "fecha_inicio_curso")]
    pub course_start: Option<NaiveDate>,
    #[sqlx(rename = "fecha_fin_curso")]
    pub course_end: Option<NaiveDate>,
    #[sqlx(rename = "activo")]
    pub active: bool,
    #[sqlx(rename = "creado_en")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub objective: Option<String>,
    pub course_start: Option<NaiveDate>,
    pub course_end: Option<NaiveDate>,
}

/// Partial group edit; `None` leaves the column as it is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub objective: Option<String>,
    pub course_start: Option<NaiveDate>,
    pub course_end: Option<NaiveDate>,
    pub active: Option<bool>,
}

/// (group, student) pair, soft-deleted on removal
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: Uuid,
    #[sqlx(rename = "grupo_id")]
    pub group_id: Uuid,
    #[sqlx(rename = "alumno_id")]
    pub student_id: Uuid,
    #[sqlx(rename = "activo")]
    pub active: bool,
    #[sqlx(rename = "fecha_ingreso")]
    pub joined_at: DateTime<Utc>,
    #[sqlx(rename = "fecha_salida")]
    pub left_at: Option<DateTime<Utc>>,
}

/// A group bulk-assigned to a routine or course.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupContentAssignment {
    pub id: Uuid,
    #[sqlx(rename = "grupo_id")]
    pub group_id: Uuid,
    #[sqlx(rename = "tipo")]
    pub kind: ContentKind,
    #[sqlx(rename = "contenido_id")]
    pub content_id: Uuid,
    #[sqlx(rename = "asignado_por")]
    pub assigned_by: Uuid,
    #[sqlx(rename = "activo")]
    pub active: bool,
    #[sqlx(rename = "fecha_asignacion")]
    pub assigned_at: DateTime<Utc>,
    #[sqlx(rename = "fecha_inicio")]
    pub start_date: Option<NaiveDate>,
    #[sqlx(rename = "fecha_fin")]
    pub end_date: Option<NaiveDate>,
}

/// A group bulk-assigned to a diet plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupDietAssignment {
    pub id: Uuid,
    #[sqlx(rename = "grupo_id")]
    pub group_id: Uuid,
    #[sqlx(rename = "dieta_id")]
    pub diet_id: Uuid,
    #[sqlx(rename = "asignado_por")]
    pub assigned_by: Uuid,
    #[sqlx(rename = "activo")]
    pub active: bool,
    #[sqlx(rename = "fecha_asignacion")]
    pub assigned_at: DateTime<Utc>,
    #[sqlx(rename = "fecha_inicio")]
    pub start_date: Option<NaiveDate>,
    #[sqlx(rename = "fecha_fin")]
    pub end_date: Option<NaiveDate>,
}

/// Insert payload for either group table. `kind == Diet` goes to the diet table.
#[derive(Debug, Clone)]
pub struct NewGroupAssignment {
    pub group_id: Uuid,
    pub kind: ContentKind,
    pub content_id: Uuid,
    pub assigned_by: Uuid,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// One weekday slot of a student's routine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DayAssignment {
    pub id: Uuid,
    #[sqlx(rename = "alumno_id")]
    pub student_id: Uuid,
    #[sqlx(rename = "dia_semana")]
    pub day_index: i16,
    #[sqlx(rename = "sesion_id")]
    pub session_id: Uuid,
    #[sqlx(rename = "fecha_inicio")]
    pub start_date: NaiveDate,
    #[sqlx(rename = "origen_asignacion_grupo_id")]
    pub source_group_assignment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewDayAssignment {
    pub student_id: Uuid,
    pub day_index: i16,
    pub session_id: Uuid,
    pub start_date: NaiveDate,
    pub source_group_assignment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseAccess {
    pub id: Uuid,
    #[sqlx(rename = "alumno_id")]
    pub student_id: Uuid,
    #[sqlx(rename = "curso_id")]
    pub course_id: Uuid,
    #[sqlx(rename = "tipo_acceso")]
    pub access_type: String,
    #[sqlx(rename = "activo")]
    pub active: bool,
    #[sqlx(rename = "notas")]
    pub notes: Option<String>,
    #[sqlx(rename = "origen_asignacion_grupo_id")]
    pub source_group_assignment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewCourseAccess {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub notes: Option<String>,
    pub source_group_assignment_id: Option<Uuid>,
}

/// Access granted to a course as a gift rather than a purchase.
pub const GIFT_ACCESS: &str = "gift";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DietAssignment {
    pub id: Uuid,
    #[sqlx(rename = "alumno_id")]
    pub student_id: Uuid,
    #[sqlx(rename = "dieta_id")]
    pub diet_id: Uuid,
    #[sqlx(rename = "activo")]
    pub active: bool,
    #[sqlx(rename = "observaciones")]
    pub observations: Option<String>,
    #[sqlx(rename = "origen_asignacion_grupo_id")]
    pub source_group_assignment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewDietAssignment {
    pub student_id: Uuid,
    pub diet_id: Uuid,
    pub observations: Option<String>,
    pub source_group_assignment_id: Option<Uuid>,
}

/// Which training session a full-week routine places on a weekday.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoutineDaySession {
    #[sqlx(rename = "rutina_id")]
    pub routine_id: Uuid,
    #[sqlx(rename = "dia")]
    pub day: String,
    #[sqlx(rename = "sesion_id")]
    pub session_id: Uuid,
}

/// Provenance text written next to the foreign key, for humans only.
pub fn provenance_note(group_name: &str) -> String {
    format!("Assigned via group {}", group_name)
}
