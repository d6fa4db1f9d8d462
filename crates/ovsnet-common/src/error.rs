//! Error types for ovsnet operations.
//!
//! This module defines the error taxonomy shared by the allocators, the
//! store backends, the bridge driver and the reconciliation agent.
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for ovsnet operations.
pub type OvsNetResult<T> = Result<T, OvsNetError>;

/// Errors that can occur during ovsnet operations.
#[derive(Debug, Error)]
pub enum OvsNetError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// stderr, or stdout when stderr was empty.
        output: String,
    },

    /// No free identifier left in a pool or key space.
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted {
        /// The exhausted resource (e.g., "vlan tag", "tunnel key").
        resource: String,
    },

    /// A concurrent writer committed first.
    #[error("Concurrent update conflict on {resource}")]
    Conflict {
        /// The contended resource.
        resource: String,
    },

    /// Record not found.
    #[error("Entry not found: {table}:{key}")]
    NotFound {
        /// The table name.
        table: String,
        /// The key.
        key: String,
    },

    /// The local bridge could not be queried or programmed.
    #[error("Dataplane unavailable: {operation}: {message}")]
    DataplaneUnavailable {
        /// The bridge operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// The persistent store could not be reached.
    #[error("Store unavailable: {operation}: {message}")]
    StoreUnavailable {
        /// The store operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Remote controller rejected or failed a request.
    #[error("Controller request failed: {operation}: {message}")]
    Controller {
        /// The controller call that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl OvsNetError {
    /// Creates a resource exhausted error.
    pub fn exhausted(resource: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    /// Creates an entry not found error.
    pub fn not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Creates a dataplane unavailable error.
    pub fn dataplane(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataplaneUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a store unavailable error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a controller error.
    pub fn controller(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Controller {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OvsNetError::Conflict { .. }
                | OvsNetError::DataplaneUnavailable { .. }
                | OvsNetError::StoreUnavailable { .. }
                | OvsNetError::ShellCommandFailed { .. }
        )
    }

    /// Returns true for errors the polling loop absorbs for one tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OvsNetError::DataplaneUnavailable { .. }
                | OvsNetError::StoreUnavailable { .. }
                | OvsNetError::ShellExec { .. }
                | OvsNetError::ShellCommandFailed { .. }
        )
    }

    /// Returns true if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OvsNetError::NotFound { .. })
    }
}
