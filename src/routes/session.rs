use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::authentication::{AuthContext, CurrentUser};
use crate::models::SessionView;

pub async fn get_session(user: CurrentUser) -> Json<SessionView> {
    Json(SessionView {
        user_id: user.id(),
        email: user.session.email.clone(),
    })
}

pub async fn sign_out(State(auth): State<Arc<AuthContext>>, user: CurrentUser) -> StatusCode {
    auth.sign_out(&user.session);
    StatusCode::NO_CONTENT
}
