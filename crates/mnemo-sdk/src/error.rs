//! SDK error types

use mnemo_core::ErrorKind;
use thiserror::Error;

use crate::config::ConfigValidationError;

/// SDK result type
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// SDK error type
#[derive(Debug, Error)]
pub enum SdkError {
    /// Engine error
    #[error(transparent)]
    Core(#[from] mnemo_core::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid operation
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl SdkError {
    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Core(mnemo_core::Error::validation(message))
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) => e.kind(),
            Self::Config(_) | Self::Toml(_) | Self::InvalidOperation { .. } => {
                ErrorKind::Validation
            }
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Check if the caller may retry the operation
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a validation failure
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Check if the long-term store was unreachable
    pub fn is_store_unavailable(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}
