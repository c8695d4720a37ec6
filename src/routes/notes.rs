use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::authentication::CurrentUser;
use crate::error::AppError;
use crate::filters::filter_notes;
use crate::models::{
    normalize_optional_text, CreateNoteRequest, NewNote, Note, NoteChanges, NoteWithCourse, NotesQuery,
    UpdateNoteRequest,
};
use crate::routes::courses::required_title;
use crate::routes::COURSES_ROUTE;
use crate::store::{Store, StoreError};

fn note_not_found(note_id: Uuid) -> AppError {
    AppError::not_found(format!("Note with id {} not found", note_id), None)
}

pub async fn list_notes(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Query(query): Query<NotesQuery>,
) -> Result<Json<Vec<NoteWithCourse>>, AppError> {
    let notes = store
        .list_notes(user.id())
        .await
        .map_err(|e| AppError::backend("cannot load notes", e))?;

    Ok(Json(filter_notes(notes, query.search.as_deref(), query.course_id)))
}

pub async fn create_note(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<Note>), AppError> {
    let title = required_title(&payload.title, "Note")?;

    let note = NewNote {
        id: Uuid::new_v4(),
        owner_id: user.id(),
        course_id,
        title,
        content: normalize_optional_text(payload.content),
    };

    match store.insert_note(note).await {
        Ok(note) => Ok((StatusCode::CREATED, Json(note))),
        Err(StoreError::ForeignCourse(_)) => Err(AppError::not_found(
            format!("Course with id {} not found", course_id),
            Some(COURSES_ROUTE),
        )),
        Err(e) => Err(AppError::backend("cannot create note", e)),
    }
}

pub async fn update_note(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Path(note_id): Path<Uuid>,
    Json(payload): Json<UpdateNoteRequest>,
) -> Result<Json<Note>, AppError> {
    let changes = NoteChanges {
        title: payload.title.as_deref().map(|t| required_title(t, "Note")).transpose()?,
        content: payload.content.map(|c| normalize_optional_text(Some(c))),
    };

    store
        .update_note(user.id(), note_id, changes)
        .await
        .map_err(|e| AppError::backend("cannot update note", e))?
        .map(Json)
        .ok_or_else(|| note_not_found(note_id))
}

pub async fn delete_note(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Path(note_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let removed = store
        .delete_note(user.id(), note_id)
        .await
        .map_err(|e| AppError::backend("cannot delete note", e))?;

    if !removed {
        return Err(note_not_found(note_id));
    }
    Ok(StatusCode::NO_CONTENT)
}
