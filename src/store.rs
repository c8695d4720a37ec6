//! Owner-scoped data access. Every call takes the caller's id and only ever
//! reads or writes rows carrying that owner, which is the authorization boundary
//! between users.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Course, CourseChanges, FileRecord, NewCourse, NewFileRecord, NewNote, Note, NoteChanges, NoteWithCourse,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Course {0} does not belong to the caller")]
    ForeignCourse(Uuid),

    #[error("Duplicate storage path: {0}")]
    DuplicatePath(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Courses by most recently updated, at most `limit` when given.
    async fn list_courses(&self, owner: Uuid, limit: Option<i64>) -> StoreResult<Vec<Course>>;

    async fn get_course(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Course>>;

    async fn insert_course(&self, course: NewCourse) -> StoreResult<Course>;

    /// `Ok(None)` when the row does not exist for this owner.
    async fn update_course(&self, owner: Uuid, id: Uuid, changes: CourseChanges) -> StoreResult<Option<Course>>;

    /// Removes the course together with its notes and file rows. Returns whether a row was removed.
    async fn delete_course(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;

    async fn count_notes(&self, owner: Uuid) -> StoreResult<i64>;

    /// A course's notes by most recently updated.
    async fn list_course_notes(&self, owner: Uuid, course_id: Uuid) -> StoreResult<Vec<Note>>;

    /// All of the owner's notes joined with their course, by most recently updated.
    async fn list_notes(&self, owner: Uuid) -> StoreResult<Vec<NoteWithCourse>>;

    async fn insert_note(&self, note: NewNote) -> StoreResult<Note>;

    async fn update_note(&self, owner: Uuid, id: Uuid, changes: NoteChanges) -> StoreResult<Option<Note>>;

    async fn delete_note(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;

    /// A course's files by most recently created.
    async fn list_course_files(&self, owner: Uuid, course_id: Uuid) -> StoreResult<Vec<FileRecord>>;

    async fn get_file(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<FileRecord>>;

    async fn insert_file(&self, file: NewFileRecord) -> StoreResult<FileRecord>;

    async fn delete_file(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;
}
