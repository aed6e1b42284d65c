//! Error types for pump operations.

use chrono::Duration;
use thiserror::Error;

/// Comprehensive error type for all pump operations.
///
/// Errors carry enough classification for the pump's control loops to decide
/// whether to retry, back off, or terminate; see the `is_*` helpers.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Operation cancelled by the service: {message}")]
    OperationCancelled { message: String },

    #[error("Message lock lost for lock token {lock_token}")]
    MessageLockLost { lock_token: String },

    #[error("Session lock lost for session '{session_id}'")]
    SessionLockLost { session_id: String },

    #[error("User callback failed: {message}")]
    UserCallbackFailure { message: String },

    #[error("Disposition '{action}' failed: {message}")]
    DispositionFailure { action: String, message: String },

    #[error("Operation not supported: {message}")]
    UnsupportedOperation { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl PumpError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::OperationCancelled { .. } => false,
            Self::MessageLockLost { .. } => false,
            Self::SessionLockLost { .. } => false,
            Self::UserCallbackFailure { .. } => false,
            Self::DispositionFailure { .. } => false,
            Self::UnsupportedOperation { .. } => false,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::ValidationError(_) => false,
        }
    }

    /// Check if error means a held lock is gone
    pub fn is_lock_lost(&self) -> bool {
        matches!(
            self,
            Self::MessageLockLost { .. } | Self::SessionLockLost { .. }
        )
    }

    /// Check if a renewal loop must stop on this error.
    ///
    /// Renewing a lost lock is pointless, and a cancelled operation means the
    /// underlying entity is gone.
    pub fn is_terminal_for_renewal(&self) -> bool {
        self.is_lock_lost() || matches!(self, Self::OperationCancelled { .. })
    }

    /// Check if a session acceptance loop must stop on this error
    pub fn is_terminal_for_acceptance(&self) -> bool {
        matches!(self, Self::OperationCancelled { .. })
    }
}

/// Validation errors for identifiers and handler options
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
