use async_trait::async_trait;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use crate::connection::PgPool;
use crate::models::{
    Course, CourseChanges, FileRecord, NewCourse, NewFileRecord, NewNote, Note, NoteChanges, NoteWithCourse,
};
use crate::schema::{courses, files, notes};
use crate::store::{Store, StoreError, StoreResult};

/// Postgres-backed store. Diesel is synchronous, so every call is moved onto
/// tokio's blocking pool with its own pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, query: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
            query(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn course_is_owned(conn: &mut PgConnection, owner: Uuid, course_id: Uuid) -> Result<bool, DieselError> {
    diesel::select(exists(
        courses::table
            .filter(courses::id.eq(course_id))
            .filter(courses::owner_id.eq(owner)),
    ))
    .get_result(conn)
}

fn get_course_from_db(conn: &mut PgConnection, owner: Uuid, course_id: Uuid) -> Result<Option<Course>, DieselError> {
    courses::table
        .filter(courses::id.eq(course_id))
        .filter(courses::owner_id.eq(owner))
        .select(Course::as_select())
        .first(conn)
        .optional()
}

fn get_note_from_db(conn: &mut PgConnection, owner: Uuid, note_id: Uuid) -> Result<Option<Note>, DieselError> {
    notes::table
        .filter(notes::id.eq(note_id))
        .filter(notes::owner_id.eq(owner))
        .select(Note::as_select())
        .first(conn)
        .optional()
}

#[async_trait]
impl Store for PgStore {
    async fn list_courses(&self, owner: Uuid, limit: Option<i64>) -> StoreResult<Vec<Course>> {
        self.run(move |conn| {
            let mut query = courses::table
                .filter(courses::owner_id.eq(owner))
                .order(courses::updated_at.desc())
                .select(Course::as_select())
                .into_boxed();

            if let Some(limit) = limit {
                query = query.limit(limit);
            }

            Ok(query.load(conn)?)
        })
        .await
    }

    async fn get_course(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Course>> {
        self.run(move |conn| Ok(get_course_from_db(conn, owner, id)?)).await
    }

    async fn insert_course(&self, course: NewCourse) -> StoreResult<Course> {
        self.run(move |conn| {
            Ok(diesel::insert_into(courses::table)
                .values(&course)
                .returning(Course::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn update_course(&self, owner: Uuid, id: Uuid, changes: CourseChanges) -> StoreResult<Option<Course>> {
        self.run(move |conn| {
            if changes.is_empty() {
                return Ok(get_course_from_db(conn, owner, id)?);
            }

            Ok(diesel::update(
                courses::table
                    .filter(courses::id.eq(id))
                    .filter(courses::owner_id.eq(owner)),
            )
            .set(&changes)
            .returning(Course::as_returning())
            .get_result(conn)
            .optional()?)
        })
        .await
    }

    async fn delete_course(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        // notes and files go with it through ON DELETE CASCADE
        self.run(move |conn| {
            let removed = diesel::delete(
                courses::table
                    .filter(courses::id.eq(id))
                    .filter(courses::owner_id.eq(owner)),
            )
            .execute(conn)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn count_notes(&self, owner: Uuid) -> StoreResult<i64> {
        self.run(move |conn| {
            Ok(notes::table
                .filter(notes::owner_id.eq(owner))
                .count()
                .get_result::<i64>(conn)?)
        })
        .await
    }

    async fn list_course_notes(&self, owner: Uuid, course_id: Uuid) -> StoreResult<Vec<Note>> {
        self.run(move |conn| {
            Ok(notes::table
                .filter(notes::owner_id.eq(owner))
                .filter(notes::course_id.eq(course_id))
                .order(notes::updated_at.desc())
                .select(Note::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn list_notes(&self, owner: Uuid) -> StoreResult<Vec<NoteWithCourse>> {
        self.run(move |conn| {
            let rows = notes::table
                .inner_join(courses::table)
                .filter(notes::owner_id.eq(owner))
                .order(notes::updated_at.desc())
                .select((Note::as_select(), courses::title, courses::color))
                .load::<(Note, String, String)>(conn)?;

            Ok(rows
                .into_iter()
                .map(|(note, course_title, course_color)| NoteWithCourse { note, course_title, course_color })
                .collect())
        })
        .await
    }

    async fn insert_note(&self, note: NewNote) -> StoreResult<Note> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                if !course_is_owned(conn, note.owner_id, note.course_id)? {
                    return Err(StoreError::ForeignCourse(note.course_id));
                }

                Ok(diesel::insert_into(notes::table)
                    .values(&note)
                    .returning(Note::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    async fn update_note(&self, owner: Uuid, id: Uuid, changes: NoteChanges) -> StoreResult<Option<Note>> {
        self.run(move |conn| {
            if changes.is_empty() {
                return Ok(get_note_from_db(conn, owner, id)?);
            }

            Ok(diesel::update(notes::table.filter(notes::id.eq(id)).filter(notes::owner_id.eq(owner)))
                .set(&changes)
                .returning(Note::as_returning())
                .get_result(conn)
                .optional()?)
        })
        .await
    }

    async fn delete_note(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let removed = diesel::delete(notes::table.filter(notes::id.eq(id)).filter(notes::owner_id.eq(owner)))
                .execute(conn)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_course_files(&self, owner: Uuid, course_id: Uuid) -> StoreResult<Vec<FileRecord>> {
        self.run(move |conn| {
            Ok(files::table
                .filter(files::owner_id.eq(owner))
                .filter(files::course_id.eq(course_id))
                .order(files::created_at.desc())
                .select(FileRecord::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn get_file(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<FileRecord>> {
        self.run(move |conn| {
            Ok(files::table
                .filter(files::id.eq(id))
                .filter(files::owner_id.eq(owner))
                .select(FileRecord::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_file(&self, file: NewFileRecord) -> StoreResult<FileRecord> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                if !course_is_owned(conn, file.owner_id, file.course_id)? {
                    return Err(StoreError::ForeignCourse(file.course_id));
                }

                diesel::insert_into(files::table)
                    .values(&file)
                    .returning(FileRecord::as_returning())
                    .get_result(conn)
                    .map_err(|e| match e {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            StoreError::DuplicatePath(file.storage_path.clone())
                        }
                        other => StoreError::Database(other),
                    })
            })
        })
        .await
    }

    async fn delete_file(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        self.run(move |conn| {
            let removed = diesel::delete(files::table.filter(files::id.eq(id)).filter(files::owner_id.eq(owner)))
                .execute(conn)?;
            Ok(removed > 0)
        })
        .await
    }
}

// These run against a disposable database: DATABASE_URL=... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{establish_pool, run_pending_migrations};
    use crate::models::{default_color, CourseStatus};

    // one pool per test binary so migrations run once
    fn store() -> PgStore {
        static POOL: std::sync::OnceLock<PgPool> = std::sync::OnceLock::new();
        let pool = POOL.get_or_init(|| {
            let url = dotenvy::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let pool = establish_pool(&url, 4).expect("pool");
            run_pending_migrations(&pool).expect("migrations");
            pool
        });
        PgStore::new(pool.clone())
    }

    fn new_course(owner: Uuid, title: &str) -> NewCourse {
        NewCourse {
            id: Uuid::new_v4(),
            owner_id: owner,
            title: title.to_string(),
            description: None,
            color: default_color(),
            status: CourseStatus::Active,
        }
    }

    fn new_note(owner: Uuid, course_id: Uuid, title: &str) -> NewNote {
        NewNote {
            id: Uuid::new_v4(),
            owner_id: owner,
            course_id,
            title: title.to_string(),
            content: None,
        }
    }

    fn new_file(owner: Uuid, course_id: Uuid, millis: i64) -> NewFileRecord {
        NewFileRecord {
            id: Uuid::new_v4(),
            owner_id: owner,
            course_id,
            filename: "a.pdf".into(),
            storage_path: format!("{}/{}/{}.pdf", owner, course_id, millis),
            size_bytes: 3,
            mime_type: "application/pdf".into(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn courses_are_invisible_to_other_owners() {
        let store = store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let course = store.insert_course(new_course(alice, "Algebra")).await.unwrap();

        assert_eq!(store.list_courses(alice, None).await.unwrap().len(), 1);
        assert!(store.list_courses(bob, None).await.unwrap().is_empty());
        assert!(store.get_course(bob, course.id).await.unwrap().is_none());
        assert!(!store.delete_course(bob, course.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn status_survives_the_text_column() {
        let store = store();
        let owner = Uuid::new_v4();
        let course = store.insert_course(new_course(owner, "Physics")).await.unwrap();
        assert_eq!(course.status, CourseStatus::Active);

        let changes = CourseChanges { status: Some(CourseStatus::Archived), ..Default::default() };
        let updated = store.update_course(owner, course.id, changes).await.unwrap().unwrap();
        assert_eq!(updated.status, CourseStatus::Archived);
        assert!(updated.updated_at > course.updated_at);

        let fetched = store.get_course(owner, course.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, CourseStatus::Archived);
    }

    #[tokio::test]
    #[ignore]
    async fn cleared_description_is_stored_as_null() {
        let store = store();
        let owner = Uuid::new_v4();
        let mut course = new_course(owner, "Biology");
        course.description = Some("cells".into());
        let course = store.insert_course(course).await.unwrap();

        let changes = CourseChanges { description: Some(None), ..Default::default() };
        let updated = store.update_course(owner, course.id, changes).await.unwrap().unwrap();
        assert_eq!(updated.description, None);
    }

    #[tokio::test]
    #[ignore]
    async fn notes_listing_carries_course_title_and_colour() {
        let store = store();
        let owner = Uuid::new_v4();
        let course = store.insert_course(new_course(owner, "Linear Algebra")).await.unwrap();
        store.insert_note(new_note(owner, course.id, "Week 1")).await.unwrap();
        store.insert_note(new_note(owner, course.id, "Week 2")).await.unwrap();

        let notes = store.list_notes(owner).await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].note.title, "Week 2");
        assert_eq!(notes[0].course_title, "Linear Algebra");
        assert_eq!(notes[0].course_color, default_color());
        assert_eq!(store.count_notes(owner).await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore]
    async fn rows_cannot_point_at_another_owners_course() {
        let store = store();
        let alice = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let course = store.insert_course(new_course(alice, "Algebra")).await.unwrap();

        let note = store.insert_note(new_note(mallory, course.id, "Sneaky")).await;
        assert!(matches!(note, Err(StoreError::ForeignCourse(_))));

        let file = store.insert_file(new_file(mallory, course.id, 1)).await;
        assert!(matches!(file, Err(StoreError::ForeignCourse(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn storage_paths_are_unique() {
        let store = store();
        let owner = Uuid::new_v4();
        let course = store.insert_course(new_course(owner, "Algebra")).await.unwrap();
        store.insert_file(new_file(owner, course.id, 42)).await.unwrap();

        let again = store.insert_file(new_file(owner, course.id, 42)).await;
        assert!(matches!(again, Err(StoreError::DuplicatePath(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn deleting_course_cascades() {
        let store = store();
        let owner = Uuid::new_v4();
        let course = store.insert_course(new_course(owner, "Algebra")).await.unwrap();
        store.insert_note(new_note(owner, course.id, "Week 1")).await.unwrap();
        let file = store.insert_file(new_file(owner, course.id, 7)).await.unwrap();

        assert!(store.delete_course(owner, course.id).await.unwrap());
        assert_eq!(store.count_notes(owner).await.unwrap(), 0);
        assert!(store.get_file(owner, file.id).await.unwrap().is_none());
    }
}
