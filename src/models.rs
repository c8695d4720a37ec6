use crate::schema::{courses, files, notes};
use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;

/// Swatches offered by the course form. The first one is the default colour.
pub const PALETTE: [&str; 12] = [
    "#3B82F6", "#10B981", "#F59E0B", "#EF4444",
    "#8B5CF6", "#EC4899", "#06B6D4", "#84CC16",
    "#F97316", "#6366F1", "#14B8A6", "#A855F7",
];

/// Multipart field carrying an uploaded course file.
pub const COURSE_FILE_FIELD: &str = "file";

pub fn default_color() -> String {
    PALETTE[0].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Active,
    Completed,
    Archived,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Active => "active",
            CourseStatus::Completed => "completed",
            CourseStatus::Archived => "archived",
        }
    }

    /// Status after one click on the status badge: active -> completed -> archived -> active.
    pub fn next(self) -> CourseStatus {
        match self {
            CourseStatus::Active => CourseStatus::Completed,
            CourseStatus::Completed => CourseStatus::Archived,
            CourseStatus::Archived => CourseStatus::Active,
        }
    }
}

impl Default for CourseStatus {
    fn default() -> Self {
        CourseStatus::Active
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown course status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for CourseStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CourseStatus::Active),
            "completed" => Ok(CourseStatus::Completed),
            "archived" => Ok(CourseStatus::Archived),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql<Text, Pg> for CourseStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for CourseStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = std::str::from_utf8(bytes.as_bytes())?;
        Ok(raw.parse()?)
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = courses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Course {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub color: String,
    pub status: CourseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = courses)]
pub struct NewCourse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub color: String,
    pub status: CourseStatus,
}

/// Column updates for a course. `None` leaves the column alone,
/// `Some(None)` on `description` clears it.
#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = courses)]
pub struct CourseChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub status: Option<CourseStatus>,
}

impl CourseChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.color.is_none() && self.status.is_none()
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = notes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Note {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = notes)]
pub struct NewNote {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub content: Option<String>,
}

#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = notes)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<Option<String>>,
}

impl NoteChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// A note as listed in the cross-course notes view, carrying its parent course's title and colour.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoteWithCourse {
    #[serde(flatten)]
    pub note: Note,
    pub course_title: String,
    pub course_color: String,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FileRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub course_id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = files)]
pub struct NewFileRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub course_id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct CreateCourseRequest {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    /// A blank description clears the column.
    pub description: Option<String>,
    pub color: Option<String>,
    pub status: Option<CourseStatus>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct CreateNoteRequest {
    pub title: String,
    pub content: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct UpdateNoteRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CoursesQuery {
    pub search: Option<String>,
    /// `active`, `completed`, `archived`, or `all`
    pub status: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct NotesQuery {
    pub search: Option<String>,
    pub course_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DashboardStats {
    pub total_courses: usize,
    pub active_courses: usize,
    pub completed_courses: usize,
    pub total_notes: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DashboardView {
    pub stats: DashboardStats,
    pub recent_courses: Vec<Course>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CourseDetailView {
    pub course: Course,
    pub notes: Vec<Note>,
    pub files: Vec<FileRecord>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionView {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// Trims `value` and maps an empty result to `None`.
pub fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_three_times_returns_to_active() {
        let mut status = CourseStatus::Active;
        let mut seen = Vec::new();
        for _ in 0..3 {
            status = status.next();
            seen.push(status);
        }
        assert_eq!(seen, vec![CourseStatus::Completed, CourseStatus::Archived, CourseStatus::Active]);
    }

    #[test]
    fn status_parses_only_known_values() {
        assert_eq!("archived".parse::<CourseStatus>().unwrap(), CourseStatus::Archived);
        assert!("Active".parse::<CourseStatus>().is_err());
        assert!("deleted".parse::<CourseStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&CourseStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn blank_text_normalizes_to_none() {
        assert_eq!(normalize_optional_text(Some("   ".into())), None);
        assert_eq!(normalize_optional_text(None), None);
        assert_eq!(normalize_optional_text(Some(" Intro ".into())), Some("Intro".to_string()));
    }
}
