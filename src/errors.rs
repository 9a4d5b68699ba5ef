use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No whois server found for: {0}")]
    NoWhoisServer(String),

    #[error("Upstream timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] tokio::io::Error),

    #[error("Upstream response too large")]
    ResponseTooLarge,

    #[error("Invalid UTF-8 in upstream response")]
    InvalidUtf8,

    #[error("CSRF validation failed")]
    CsrfValidation,

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout
    }
}

impl GatewayError {
    /// Stable client-facing body. Upstream detail stays server-side.
    fn client_message(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid domain"),
            GatewayError::CsrfValidation => (StatusCode::FORBIDDEN, "Invalid CSRF token"),
            GatewayError::NoWhoisServer(_)
            | GatewayError::Timeout
            | GatewayError::IoError(_)
            | GatewayError::ResponseTooLarge
            | GatewayError::InvalidUtf8 => {
                (StatusCode::INTERNAL_SERVER_ERROR, "WHOIS lookup failed")
            }
            GatewayError::ConfigError(_) | GatewayError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = self.client_message();
        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
