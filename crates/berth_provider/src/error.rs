//! Error types for the provider module.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can be returned by a cloud provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Conflicting operation in progress: {0}")]
    Conflict(String),

    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_) | ProviderError::Conflict(_) | ProviderError::Transient(_)
        )
    }

    /// Rejections that no amount of retrying will fix.
    pub fn is_permission_or_validation(&self) -> bool {
        matches!(
            self,
            ProviderError::PermissionDenied(_)
                | ProviderError::Validation(_)
                | ProviderError::QuotaExceeded(_)
                | ProviderError::Unsupported(_)
        )
    }
}
