use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::AppState;

pub mod courses;
pub mod dashboard;
pub mod files;
pub mod notes;
pub mod session;

pub const COURSES_ROUTE: &str = "/courses";

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/v1/session", get(session::get_session))
        .route("/v1/session/sign-out", post(session::sign_out))
        .route("/v1/dashboard", get(dashboard::get_dashboard))
        .route("/v1/courses", get(courses::list_courses).post(courses::create_course))
        .route(
            "/v1/courses/:course_id",
            get(courses::get_course_details)
                .patch(courses::update_course)
                .delete(courses::delete_course),
        )
        .route("/v1/courses/:course_id/status/cycle", post(courses::cycle_course_status))
        .route("/v1/courses/:course_id/notes", post(notes::create_note))
        .route("/v1/courses/:course_id/files", post(files::upload_file))
        .route("/v1/notes", get(notes::list_notes))
        .route("/v1/notes/:note_id", patch(notes::update_note).delete(notes::delete_note))
        .route("/v1/files/:file_id", delete(files::delete_file))
        .route("/v1/files/:file_id/download", get(files::download_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
