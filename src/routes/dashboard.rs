use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::authentication::CurrentUser;
use crate::error::AppError;
use crate::filters::dashboard_stats;
use crate::models::DashboardView;
use crate::store::Store;

/// How many courses the dashboard shows, and counts over.
pub const RECENT_COURSES: i64 = 6;

pub async fn get_dashboard(
    State(store): State<Arc<dyn Store>>,
    user: CurrentUser,
) -> Result<Json<DashboardView>, AppError> {
    let owner = user.id();
    let (recent_courses, total_notes) = tokio::try_join!(
        store.list_courses(owner, Some(RECENT_COURSES)),
        store.count_notes(owner),
    )
    .map_err(|e| AppError::backend("cannot load dashboard", e))?;

    Ok(Json(DashboardView {
        stats: dashboard_stats(&recent_courses, total_notes),
        recent_courses,
    }))
}
