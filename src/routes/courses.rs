use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;
use uuid::Uuid;

use crate::authentication::CurrentUser;
use crate::error::AppError;
use crate::filters::{filter_courses, StatusFilter};
use crate::models::{
    default_color, normalize_optional_text, Course, CourseChanges, CourseDetailView, CourseStatus, CoursesQuery,
    CreateCourseRequest, NewCourse, UpdateCourseRequest,
};
use crate::routes::COURSES_ROUTE;
use crate::storage::{ObjectStorage, UserBucket};
use crate::store::Store;
use crate::transfer;

fn course_not_found(course_id: Uuid) -> AppError {
    AppError::not_found(format!("Course with id {} not found", course_id), Some(COURSES_ROUTE))
}

/// Trimmed title, or a validation error when nothing is left.
pub fn required_title(raw: &str, what: &str) -> Result<String, AppError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::validation(format!("{} title can't be empty", what)));
    }
    Ok(title.to_string())
}

pub async fn list_courses(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Query(query): Query<CoursesQuery>,
) -> Result<Json<Vec<Course>>, AppError> {
    let status = StatusFilter::parse(query.status.as_deref()).map_err(|e| AppError::validation(e.to_string()))?;

    let courses = store
        .list_courses(user.id(), None)
        .await
        .map_err(|e| AppError::backend("cannot load courses", e))?;

    Ok(Json(filter_courses(courses, query.search.as_deref(), status)))
}

pub async fn create_course(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>), AppError> {
    let title = required_title(&payload.title, "Course")?;

    let new_course = NewCourse {
        id: Uuid::new_v4(),
        owner_id: user.id(),
        title,
        description: normalize_optional_text(payload.description),
        color: normalize_optional_text(payload.color).unwrap_or_else(default_color),
        status: CourseStatus::Active,
    };

    let course = store
        .insert_course(new_course)
        .await
        .map_err(|e| AppError::backend("cannot create course", e))?;

    info!(course_id = %course.id, owner = %course.owner_id, "Created course");
    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn get_course_details(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetailView>, AppError> {
    let owner = user.id();
    let course = store
        .get_course(owner, course_id)
        .await
        .map_err(|e| AppError::backend("cannot load course", e))?
        .ok_or_else(|| course_not_found(course_id))?;

    let (notes, files) = tokio::try_join!(
        store.list_course_notes(owner, course_id),
        store.list_course_files(owner, course_id),
    )
    .map_err(|e| AppError::backend("cannot load course", e))?;

    Ok(Json(CourseDetailView { course, notes, files }))
}

pub async fn update_course(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<UpdateCourseRequest>,
) -> Result<Json<Course>, AppError> {
    let changes = CourseChanges {
        title: payload.title.as_deref().map(|t| required_title(t, "Course")).transpose()?,
        description: payload.description.map(|d| normalize_optional_text(Some(d))),
        color: match payload.color {
            Some(color) => Some(
                normalize_optional_text(Some(color)).ok_or_else(|| AppError::validation("Color can't be empty"))?,
            ),
            None => None,
        },
        status: payload.status,
    };

    store
        .update_course(user.id(), course_id, changes)
        .await
        .map_err(|e| AppError::backend("cannot update course", e))?
        .map(Json)
        .ok_or_else(|| course_not_found(course_id))
}

/// One click on the status badge. Returns the stored row so the list can be patched in place.
pub async fn cycle_course_status(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Course>, AppError> {
    let owner = user.id();
    let course = store
        .get_course(owner, course_id)
        .await
        .map_err(|e| AppError::backend("cannot update status", e))?
        .ok_or_else(|| course_not_found(course_id))?;

    let changes = CourseChanges {
        status: Some(course.status.next()),
        ..Default::default()
    };

    store
        .update_course(owner, course_id, changes)
        .await
        .map_err(|e| AppError::backend("cannot update status", e))?
        .map(Json)
        .ok_or_else(|| course_not_found(course_id))
}

pub async fn delete_course(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    user: CurrentUser,
    Path(course_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let owner = user.id();
    let bucket = UserBucket::new(storage.as_ref(), owner);

    let removed = transfer::delete_course(store.as_ref(), &bucket, owner, course_id)
        .await
        .map_err(|e| AppError::backend("cannot delete course", e))?;

    if !removed {
        return Err(course_not_found(course_id));
    }

    info!(%course_id, %owner, "Deleted course");
    Ok(StatusCode::NO_CONTENT)
}
