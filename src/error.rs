use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use crate::authentication::LOGIN_ROUTE;
use crate::models::ErrorResponse;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Rejected before any store or storage call was made.
    #[error("{0}")]
    Validation(String),

    #[error("Login required")]
    Unauthenticated,

    #[error("{message}")]
    NotFound { message: String, redirect: Option<&'static str> },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    /// The store or bucket refused. Only `message` reaches the client.
    #[error("{message}")]
    Backend {
        message: &'static str,
        #[source]
        source: BoxError,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>, redirect: Option<&'static str>) -> Self {
        AppError::NotFound { message: message.into(), redirect }
    }

    pub fn backend(message: &'static str, source: impl Into<BoxError>) -> Self {
        AppError::Backend { message, source: source.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let redirect = match &self {
            AppError::Unauthenticated => Some(LOGIN_ROUTE.to_string()),
            AppError::NotFound { redirect, .. } => redirect.map(str::to_string),
            _ => None,
        };

        match &self {
            AppError::Backend { message, source } => error!(error = %source, "{}", message),
            AppError::Forbidden(message) => warn!("{}", message),
            _ => {}
        }

        let body = ErrorResponse { error: self.to_string(), redirect };
        (status, Json(body)).into_response()
    }
}
