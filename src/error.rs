use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// OpenAI error categories, plus the two custom ones llama-style servers add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "invalid_request_error")]
    InvalidRequest,
    #[serde(rename = "authentication_error")]
    Authentication,
    #[serde(rename = "not_found_error")]
    NotFound,
    #[serde(rename = "server_error")]
    Server,
    #[serde(rename = "permission_error")]
    Permission,
    #[serde(rename = "not_supported_error")]
    NotSupported,
    #[serde(rename = "unavailable_error")]
    Unavailable,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Server => 500,
            ErrorKind::Permission => 403,
            ErrorKind::NotSupported => 501,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn type_tag(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::Server => "server_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotSupported => "not_supported_error",
            ErrorKind::Unavailable => "unavailable_error",
        }
    }
}

/// The `{code, message, type}` object rendered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
}

pub fn format_error_response(message: impl Into<String>, kind: ErrorKind) -> ErrorEnvelope {
    ErrorEnvelope {
        code: kind.status_code(),
        message: message.into(),
        kind,
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotSupported(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("chat template error: {0}")]
    Template(String),
    #[error("engine failure: {0}")]
    Engine(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ServiceError::NotSupported(_) => ErrorKind::NotSupported,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Unavailable(_) => ErrorKind::Unavailable,
            ServiceError::Template(_)
            | ServiceError::Engine(_)
            | ServiceError::Io(_)
            | ServiceError::Json(_) => ErrorKind::Server,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        format_error_response(self.to_string(), self.kind())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let envelope = self.envelope();
        let status =
            StatusCode::from_u16(envelope.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": envelope,
        });

        (status, axum::Json(body)).into_response()
    }
}
