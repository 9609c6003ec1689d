//! Error types for blobferry
//!
//! This module provides user-friendly error types with actionable messages
//! that help diagnose and resolve issues.

use thiserror::Error;

/// Result type alias for blobferry operations
pub type Result<T> = std::result::Result<T, FerryError>;

/// Common error type for blobferry components
///
/// All errors include contextual information to help operators understand
/// what went wrong and how to fix it.
#[derive(Error, Debug)]
pub enum FerryError {
    /// File system operations failed (read, write, rename, create directory, etc.)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}. {suggestion}")]
    Config { message: String, suggestion: String },

    /// Blob storage setup or operation failed
    #[error("Blob storage error: {operation} - {reason}")]
    Storage { operation: String, reason: String },
}

impl FerryError {
    /// Create a configuration error with suggestion
    pub fn config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a blob storage error
    pub fn storage(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
