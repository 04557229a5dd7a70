use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::chat_client::ChatError;

pub const CHAT_FAILED: &str = "Chat provider request failed.";
pub const CLASSIFY_FAILED: &str = "Classification failed.";

/// Errors surfaced to HTTP clients. Upstream messages are fixed strings; the
/// underlying cause is logged where it happens and never returned.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Upstream(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Config(message) => ApiError::BadRequest(message),
            ChatError::Request(_) => ApiError::Upstream(CHAT_FAILED),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_errors_map_to_status() {
        let config = ApiError::from(ChatError::Config("GROQ_API_KEY is not set".into()));
        assert_eq!(config.status(), StatusCode::BAD_REQUEST);
        assert_eq!(config.to_string(), "GROQ_API_KEY is not set");

        let upstream = ApiError::from(ChatError::Request("connection refused to 10.0.0.3".into()));
        assert_eq!(upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(upstream.to_string(), CHAT_FAILED);
    }
}
