use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("valuation error: {0}")]
    Valuation(String),

    #[error("external service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("scenario storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug)]
pub enum ExternalServiceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<serde_json::Error> for ExternalServiceError {
    fn from(value: serde_json::Error) -> Self {
        ExternalServiceError::InvalidResponse(value.to_string())
    }
}

impl ModelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ModelError::Validation(msg.into())
    }

    pub fn valuation(msg: impl Into<String>) -> Self {
        ModelError::Valuation(msg.into())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
