//! Error types for gpuhub

use thiserror::Error;

/// Main error type for gpuhub
#[derive(Error, Debug)]
pub enum GpuhubError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource catalog missing or unreadable
    #[error("Resource catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Malformed resource catalog line
    #[error("Resource catalog parse error on line {line}: {reason}")]
    CatalogParse { line: usize, reason: String },

    /// Persisted allocation table exists but cannot be trusted
    #[error("Allocation store corrupt: {0}")]
    StoreCorrupt(String),

    /// No single host can satisfy the request
    #[error("No resources available to fulfill request for {requested} GPU(s)")]
    InsufficientResources { requested: u32 },

    /// Request rejected before touching any state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Container orchestrator error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GpuhubError {
    /// Whether the caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, GpuhubError::InsufficientResources { .. })
    }
}

/// Result type for gpuhub operations
pub type GpuhubResult<T> = Result<T, GpuhubError>;

impl From<serde_json::Error> for GpuhubError {
    fn from(err: serde_json::Error) -> Self {
        GpuhubError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuhubError {
    fn from(err: toml::de::Error) -> Self {
        GpuhubError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpuhubError::CatalogParse {
            line: 3,
            reason: "missing capacity".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Resource catalog parse error on line 3: missing capacity"
        );

        let err = GpuhubError::InsufficientResources { requested: 2 };
        assert_eq!(
            err.to_string(),
            "No resources available to fulfill request for 2 GPU(s)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GpuhubError = io_err.into();
        assert!(matches!(err, GpuhubError::Io(_)));
    }

    #[test]
    fn test_only_insufficient_resources_is_retryable() {
        assert!(GpuhubError::InsufficientResources { requested: 1 }.is_retryable());
        assert!(!GpuhubError::StoreCorrupt("bad".to_string()).is_retryable());
        assert!(!GpuhubError::CatalogUnavailable("gone".to_string()).is_retryable());
    }
}
