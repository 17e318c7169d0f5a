use actix_web::{http::header::ContentType, http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Validation(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

impl EmulatorError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        EmulatorError::Authentication(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EmulatorError::Validation(msg.into())
    }

    pub fn websocket(msg: impl Into<String>) -> Self {
        EmulatorError::WebSocket(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EmulatorError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EmulatorError::Internal(msg.into())
    }
}

/// Serialize a message the way every emulator body is framed: as a
/// pretty-printed JSON string value.
pub fn json_string_body(msg: &str) -> String {
    serde_json::to_string_pretty(&serde_json::Value::String(msg.to_owned()))
        .unwrap_or_else(|_| String::from("\"\""))
}

impl ResponseError for EmulatorError {
    fn status_code(&self) -> StatusCode {
        match self {
            EmulatorError::Authentication(_) => StatusCode::UNAUTHORIZED,
            EmulatorError::Validation(_) => StatusCode::BAD_REQUEST,
            EmulatorError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            // Unknown control-plane routes answer with an empty body.
            EmulatorError::NotFound(_) => HttpResponse::build(status).finish(),
            _ => HttpResponse::build(status)
                .insert_header(ContentType::json())
                .body(json_string_body(&self.to_string())),
        }
    }
}

pub type EmulatorResult<T> = Result<T, EmulatorError>;
