//! Derivations over already-fetched collections: search, status filter and dashboard counts.
//!
//! Nothing here touches the store, so views can be checked against plain vectors.

use crate::models::{Course, CourseStatus, DashboardStats, NoteWithCourse};
use uuid::Uuid;

/// Status filter for the course list. `All` is what the list shows when no filter is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(CourseStatus),
}

impl StatusFilter {
    /// Parses the `status` query parameter. Missing or `all` means no filter.
    pub fn parse(raw: Option<&str>) -> Result<StatusFilter, crate::models::UnknownStatus> {
        match raw.map(str::trim) {
            None | Some("") | Some("all") => Ok(StatusFilter::All),
            Some(other) => Ok(StatusFilter::Only(other.parse()?)),
        }
    }

    fn admits(&self, status: CourseStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }
}

fn contains_folded(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Lower-cased search term, or `None` when the term is empty. Whitespace is matched as typed.
fn search_needle(term: Option<&str>) -> Option<String> {
    term.filter(|t| !t.is_empty()).map(str::to_lowercase)
}

pub fn course_matches(course: &Course, search: Option<&str>, status: StatusFilter) -> bool {
    if !status.admits(course.status) {
        return false;
    }

    match search_needle(search) {
        None => true,
        Some(needle) => {
            contains_folded(&course.title, &needle)
                || course
                    .description
                    .as_deref()
                    .map(|d| contains_folded(d, &needle))
                    .unwrap_or(false)
        }
    }
}

/// Keeps courses whose title or description contains `search` (ignoring case)
/// and whose status passes `status`. Order is preserved.
pub fn filter_courses(courses: Vec<Course>, search: Option<&str>, status: StatusFilter) -> Vec<Course> {
    courses
        .into_iter()
        .filter(|c| course_matches(c, search, status))
        .collect()
}

pub fn note_matches(note: &NoteWithCourse, search: Option<&str>, course_id: Option<Uuid>) -> bool {
    if let Some(course_id) = course_id {
        if note.note.course_id != course_id {
            return false;
        }
    }

    match search_needle(search) {
        None => true,
        Some(needle) => {
            contains_folded(&note.note.title, &needle)
                || note
                    .note
                    .content
                    .as_deref()
                    .map(|c| contains_folded(c, &needle))
                    .unwrap_or(false)
                || contains_folded(&note.course_title, &needle)
        }
    }
}

/// Keeps notes whose title, content or parent course title contains `search`
/// (ignoring case), restricted to `course_id` when one is given.
pub fn filter_notes(notes: Vec<NoteWithCourse>, search: Option<&str>, course_id: Option<Uuid>) -> Vec<NoteWithCourse> {
    notes
        .into_iter()
        .filter(|n| note_matches(n, search, course_id))
        .collect()
}

/// Counts over whatever page of courses the dashboard fetched.
/// With more courses than the page holds, the counts only cover that page.
pub fn dashboard_stats(recent: &[Course], total_notes: i64) -> DashboardStats {
    DashboardStats {
        total_courses: recent.len(),
        active_courses: recent.iter().filter(|c| c.status == CourseStatus::Active).count(),
        completed_courses: recent.iter().filter(|c| c.status == CourseStatus::Completed).count(),
        total_notes,
    }
}
