use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Candidate or audio-feature fetch failed and no cached fallback exists
    #[error("Upstream unavailable: {0}")]
    TransientUpstream(String),

    /// User has no taste profile or interaction history yet
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Weights or thresholds out of their valid range; fatal at load time
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(err: serde_json::Error) -> Self {
        DiscoveryError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for DiscoveryError {
    fn from(err: config::ConfigError) -> Self {
        DiscoveryError::Configuration(err.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for DiscoveryError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            DiscoveryError::NotFound(msg) | DiscoveryError::Validation(msg) => msg.clone(),
            _ => self.to_string(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            DiscoveryError::NotFound(_) => StatusCode::NOT_FOUND,
            DiscoveryError::Validation(_) | DiscoveryError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            DiscoveryError::TransientUpstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
