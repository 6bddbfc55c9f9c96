use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FluxError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Backend error: {message}")]
    BackendError {
        message: String,
        details: Option<Value>,
    },
    #[error("Upstream error: {message}")]
    UpstreamError {
        status: Option<u16>,
        message: String,
    },
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Encode error: {0}")]
    EncodeError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl FluxError {
    pub fn backend(message: impl Into<String>) -> Self {
        FluxError::BackendError {
            message: message.into(),
            details: None,
        }
    }

    /// Machine-readable detail attached to the error, if the failing
    /// collaborator reported any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            FluxError::BackendError { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            FluxError::UpstreamError { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FluxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_prefixes() {
        let err = FluxError::ConfigError("FAL_KEY is empty".into());
        assert_eq!(err.to_string(), "Configuration error: FAL_KEY is empty");

        let err = FluxError::backend("queue rejected the request");
        assert_eq!(err.to_string(), "Backend error: queue rejected the request");
        assert!(err.details().is_none());
    }

    #[test]
    fn test_backend_details_exposed() {
        let err = FluxError::BackendError {
            message: "validation failed".into(),
            details: Some(json!([{ "loc": ["body", "num_images"], "msg": "too large" }])),
        };
        assert_eq!(err.details().unwrap()[0]["msg"], "too large");
    }
}
