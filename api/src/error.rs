use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use agentry_core::error::{AgentError, Envelope, codes};

/// Internal error type that converts to structured envelope responses.
#[derive(Debug)]
pub enum AppError {
    /// Missing or invalid bearer credential (401)
    Unauthorized { message: String },
    /// Field/format/enum violation (400)
    Validation {
        message: String,
        field: Option<String>,
    },
    /// Wrong current step for the requested transition (400)
    StepMismatch { requested: u8, current: u8 },
    /// MIME/size/field-name violation on an upload (400)
    Attachment { field: String, message: String },
    /// No matching resource, or not owned by the caller (404)
    NotFound { message: String },
    /// Slug retries exceeded (500)
    SlugExhausted,
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Validation { field, message } => AppError::Validation {
                message,
                field: Some(field),
            },
            AgentError::StepMismatch { requested, current } => {
                AppError::StepMismatch { requested, current }
            }
            AgentError::NotFound => AppError::NotFound {
                message: "Agent not found or you do not have permission to modify it".to_string(),
            },
            AgentError::SlugExhausted { .. } => AppError::SlugExhausted,
            AgentError::Attachment(err) => AppError::Attachment {
                field: err.field().to_string(),
                message: err.to_string(),
            },
            AgentError::Store(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, field) = match self {
            AppError::Unauthorized { message } => (
                StatusCode::UNAUTHORIZED,
                codes::AUTHENTICATION_REQUIRED,
                message,
                None,
            ),
            AppError::Validation { message, field } => (
                StatusCode::BAD_REQUEST,
                codes::VALIDATION_FAILED,
                message,
                field,
            ),
            AppError::StepMismatch { requested, current } => (
                StatusCode::BAD_REQUEST,
                codes::STEP_MISMATCH,
                format!("Cannot update step {requested}: agent is at step {current}"),
                None,
            ),
            AppError::Attachment { field, message } => (
                StatusCode::BAD_REQUEST,
                codes::ATTACHMENT_REJECTED,
                message,
                Some(field),
            ),
            AppError::NotFound { message } => {
                (StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
            }
            AppError::SlugExhausted => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::GENERATION_EXHAUSTED,
                "Could not allocate a unique agent identifier".to_string(),
                None,
            ),
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::STORE_FAILURE,
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::INTERNAL_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        (status, Json(Envelope::<()>::err(code, message, field))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_mismatch_names_the_actual_step() {
        let response = AppError::StepMismatch {
            requested: 3,
            current: 1,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn agent_errors_map_to_the_right_classes() {
        let app: AppError = AgentError::validation("tone", "bad tone").into();
        assert!(matches!(
            app,
            AppError::Validation {
                field: Some(ref f),
                ..
            } if f == "tone"
        ));

        let app: AppError = AgentError::NotFound.into();
        assert!(matches!(app, AppError::NotFound { .. }));

        let app: AppError = AgentError::SlugExhausted { attempts: 20 }.into();
        assert!(matches!(app, AppError::SlugExhausted));
    }
}
