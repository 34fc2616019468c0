use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("unsupported oauth provider {0}")]
    UnsupportedProvider(String),
    #[error("invalid credentials")]
    Authentication,
    #[error("{0} already taken")]
    Conflict(&'static str),
    #[error("oauth state mismatch")]
    StateMismatch,
    #[error("upstream provider failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Unreadable request bodies are reported like any other invalid input.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(vec![FieldError::new("body", rejection.body_text())])
    }
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a [FieldError]>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnsupportedProvider(_) | AppError::StateMismatch => StatusCode::BAD_REQUEST,
            AppError::Authentication => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let conflict;
        let (message, fields) = match &self {
            AppError::Validation(fields) => ("validation failed", Some(fields.as_slice())),
            AppError::UnsupportedProvider(_) => ("unsupported provider", None),
            AppError::Authentication => ("invalid credentials", None),
            AppError::Conflict(field) => {
                conflict = format!("{field} already taken");
                (conflict.as_str(), None)
            }
            AppError::StateMismatch => ("invalid oauth state", None),
            AppError::Upstream(detail) => {
                error!(detail = %detail, "upstream provider failure");
                ("provider unavailable, try again", None)
            }
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                ("internal server error", None)
            }
        };
        (status, Json(ErrorResponse { error: message, fields })).into_response()
    }
}
