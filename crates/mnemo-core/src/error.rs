//! Error types for mnemo-core.
//!
//! Every error maps onto one [`ErrorKind`], knows whether it is worth
//! retrying, and carries an [`ErrorContext`] naming the project and item it
//! concerns.

use std::fmt;

use thiserror::Error;

use crate::types::ItemState;

/// Result type alias using mnemo-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification used for retry and degradation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Embedding/summarization timeout or rate limit.
    TransientProvider,
    /// Vector store unreachable.
    StoreUnavailable,
    /// Oversized or malformed input.
    Validation,
    /// Duplicate id on write.
    Consistency,
    /// Cycle cancelled or timed out.
    Cancelled,
    /// Illegal item lifecycle transition.
    InvalidTransition,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientProvider => "transient_provider",
            Self::StoreUnavailable => "store_unavailable",
            Self::Validation => "validation",
            Self::Consistency => "consistency",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition => "invalid_transition",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic context attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub project_id: Option<String>,
    pub item_id: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.project_id, &self.item_id) {
            (Some(p), Some(i)) => write!(f, " [project={} item={}]", p, i),
            (Some(p), None) => write!(f, " [project={}]", p),
            (None, Some(i)) => write!(f, " [item={}]", i),
            (None, None) => Ok(()),
        }
    }
}

/// Core error types for mnemo operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transient provider error from {provider}: {message}{context}")]
    TransientProvider {
        provider: String,
        message: String,
        context: ErrorContext,
    },

    #[error("Provider {provider} failed: {message}{context}")]
    Provider {
        provider: String,
        message: String,
        context: ErrorContext,
    },

    #[error("Long-term store unavailable: {message}{context}")]
    StoreUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation failed: {message}{context}")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Duplicate id on write: {id}{context}")]
    Consistency { id: String, context: ErrorContext },

    #[error("Consolidation cycle cancelled: {reason}{context}")]
    Cancelled {
        reason: String,
        context: ErrorContext,
    },

    #[error("Invalid lifecycle transition {from} -> {to}{context}")]
    InvalidTransition {
        from: ItemState,
        to: ItemState,
        context: ErrorContext,
    },

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transient (retryable) provider error
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientProvider {
            provider: provider.into(),
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a permanent provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a consistency (duplicate id) error
    pub fn consistency(id: impl Into<String>) -> Self {
        Self::Consistency {
            id: id.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
            context: ErrorContext::default(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientProvider { .. } => ErrorKind::TransientProvider,
            Self::Provider { .. } => ErrorKind::Internal,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Consistency { .. } => ErrorKind::Consistency,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            #[cfg(feature = "sqlite")]
            Self::Database(_) => ErrorKind::StoreUnavailable,
            Self::Serialization(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientProvider | ErrorKind::StoreUnavailable | ErrorKind::Cancelled
        )
    }

    /// Diagnostic context, if this variant carries one.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::TransientProvider { context, .. }
            | Self::Provider { context, .. }
            | Self::StoreUnavailable { context, .. }
            | Self::Validation { context, .. }
            | Self::Consistency { context, .. }
            | Self::Cancelled { context, .. }
            | Self::InvalidTransition { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::TransientProvider { context, .. }
            | Self::Provider { context, .. }
            | Self::StoreUnavailable { context, .. }
            | Self::Validation { context, .. }
            | Self::Consistency { context, .. }
            | Self::Cancelled { context, .. }
            | Self::InvalidTransition { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Attach the project id (kept if one is already set).
    pub fn with_project(mut self, project_id: &str) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.project_id.get_or_insert_with(|| project_id.to_string());
        }
        self
    }

    /// Attach the item id (kept if one is already set).
    pub fn with_item(mut self, item_id: &str) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.item_id.get_or_insert_with(|| item_id.to_string());
        }
        self
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
