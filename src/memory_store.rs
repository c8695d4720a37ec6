use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Course, CourseChanges, FileRecord, NewCourse, NewFileRecord, NewNote, Note, NoteChanges, NoteWithCourse,
};
use crate::store::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    courses: Vec<Course>,
    notes: Vec<Note>,
    files: Vec<FileRecord>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Wall-clock time, nudged forward so two writes never share a timestamp.
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn owns_course(&self, owner: Uuid, course_id: Uuid) -> bool {
        self.courses.iter().any(|c| c.id == course_id && c.owner_id == owner)
    }
}

/// Process-local store with the same ownership, ordering and cascade rules as the
/// Postgres schema. Used for local runs without a database and in tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn newest_first<T>(rows: &mut [T], key: impl Fn(&T) -> DateTime<Utc>) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_courses(&self, owner: Uuid, limit: Option<i64>) -> StoreResult<Vec<Course>> {
        self.record_call();
        let tables = self.tables.read().await;
        let mut rows: Vec<Course> = tables.courses.iter().filter(|c| c.owner_id == owner).cloned().collect();
        newest_first(&mut rows, |c| c.updated_at);
        if let Some(limit) = limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn get_course(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Course>> {
        self.record_call();
        let tables = self.tables.read().await;
        Ok(tables.courses.iter().find(|c| c.id == id && c.owner_id == owner).cloned())
    }

    async fn insert_course(&self, course: NewCourse) -> StoreResult<Course> {
        self.record_call();
        let mut tables = self.tables.write().await;
        let now = tables.now();
        let row = Course {
            id: course.id,
            owner_id: course.owner_id,
            title: course.title,
            description: course.description,
            color: course.color,
            status: course.status,
            created_at: now,
            updated_at: now,
        };
        tables.courses.push(row.clone());
        Ok(row)
    }

    async fn update_course(&self, owner: Uuid, id: Uuid, changes: CourseChanges) -> StoreResult<Option<Course>> {
        self.record_call();
        let mut tables = self.tables.write().await;
        let now = tables.now();
        let Some(row) = tables.courses.iter_mut().find(|c| c.id == id && c.owner_id == owner) else {
            return Ok(None);
        };

        if changes.is_empty() {
            return Ok(Some(row.clone()));
        }
        if let Some(title) = changes.title {
            row.title = title;
        }
        if let Some(description) = changes.description {
            row.description = description;
        }
        if let Some(color) = changes.color {
            row.color = color;
        }
        if let Some(status) = changes.status {
            row.status = status;
        }
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn delete_course(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        self.record_call();
        let mut tables = self.tables.write().await;
        let before = tables.courses.len();
        tables.courses.retain(|c| !(c.id == id && c.owner_id == owner));
        if tables.courses.len() == before {
            return Ok(false);
        }

        tables.notes.retain(|n| n.course_id != id);
        tables.files.retain(|f| f.course_id != id);
        Ok(true)
    }

    async fn count_notes(&self, owner: Uuid) -> StoreResult<i64> {
        self.record_call();
        let tables = self.tables.read().await;
        Ok(tables.notes.iter().filter(|n| n.owner_id == owner).count() as i64)
    }

    async fn list_course_notes(&self, owner: Uuid, course_id: Uuid) -> StoreResult<Vec<Note>> {
        self.record_call();
        let tables = self.tables.read().await;
        let mut rows: Vec<Note> = tables
            .notes
            .iter()
            .filter(|n| n.owner_id == owner && n.course_id == course_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |n| n.updated_at);
        Ok(rows)
    }

    async fn list_notes(&self, owner: Uuid) -> StoreResult<Vec<NoteWithCourse>> {
        self.record_call();
        let tables = self.tables.read().await;
        let mut rows: Vec<NoteWithCourse> = tables
            .notes
            .iter()
            .filter(|n| n.owner_id == owner)
            .filter_map(|n| {
                tables.courses.iter().find(|c| c.id == n.course_id).map(|c| NoteWithCourse {
                    note: n.clone(),
                    course_title: c.title.clone(),
                    course_color: c.color.clone(),
                })
            })
            .collect();
        newest_first(&mut rows, |n| n.note.updated_at);
        Ok(rows)
    }

    async fn insert_note(&self, note: NewNote) -> StoreResult<Note> {
        self.record_call();
        let mut tables = self.tables.write().await;
        if !tables.owns_course(note.owner_id, note.course_id) {
            return Err(StoreError::ForeignCourse(note.course_id));
        }

        let now = tables.now();
        let row = Note {
            id: note.id,
            owner_id: note.owner_id,
            course_id: note.course_id,
            title: note.title,
            content: note.content,
            created_at: now,
            updated_at: now,
        };
        tables.notes.push(row.clone());
        Ok(row)
    }

    async fn update_note(&self, owner: Uuid, id: Uuid, changes: NoteChanges) -> StoreResult<Option<Note>> {
        self.record_call();
        let mut tables = self.tables.write().await;
        let now = tables.now();
        let Some(row) = tables.notes.iter_mut().find(|n| n.id == id && n.owner_id == owner) else {
            return Ok(None);
        };

        if changes.is_empty() {
            return Ok(Some(row.clone()));
        }
        if let Some(title) = changes.title {
            row.title = title;
        }
        if let Some(content) = changes.content {
            row.content = content;
        }
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn delete_note(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        self.record_call();
        let mut tables = self.tables.write().await;
        let before = tables.notes.len();
        tables.notes.retain(|n| !(n.id == id && n.owner_id == owner));
        Ok(tables.notes.len() != before)
    }

    async fn list_course_files(&self, owner: Uuid, course_id: Uuid) -> StoreResult<Vec<FileRecord>> {
        self.record_call();
        let tables = self.tables.read().await;
        let mut rows: Vec<FileRecord> = tables
            .files
            .iter()
            .filter(|f| f.owner_id == owner && f.course_id == course_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |f| f.created_at);
        Ok(rows)
    }

    async fn get_file(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<FileRecord>> {
        self.record_call();
        let tables = self.tables.read().await;
        Ok(tables.files.iter().find(|f| f.id == id && f.owner_id == owner).cloned())
    }

    async fn insert_file(&self, file: NewFileRecord) -> StoreResult<FileRecord> {
        self.record_call();
        let mut tables = self.tables.write().await;
        if !tables.owns_course(file.owner_id, file.course_id) {
            return Err(StoreError::ForeignCourse(file.course_id));
        }
        if tables.files.iter().any(|f| f.storage_path == file.storage_path) {
            return Err(StoreError::DuplicatePath(file.storage_path));
        }

        let row = FileRecord {
            id: file.id,
            owner_id: file.owner_id,
            course_id: file.course_id,
            filename: file.filename,
            storage_path: file.storage_path,
            size_bytes: file.size_bytes,
            mime_type: file.mime_type,
            created_at: tables.now(),
        };
        tables.files.push(row.clone());
        Ok(row)
    }

    async fn delete_file(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        self.record_call();
        let mut tables = self.tables.write().await;
        let before = tables.files.len();
        tables.files.retain(|f| !(f.id == id && f.owner_id == owner));
        Ok(tables.files.len() != before)
    }
}
