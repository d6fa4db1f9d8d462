//! Controller call errors.

use ovsnet_common::OvsNetError;
use thiserror::Error;

/// Result type alias for controller calls.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors returned by a [`ControllerClient`](crate::ControllerClient).
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The resource does not exist on the controller.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// The resource already exists on the controller.
    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    /// Any other non-success HTTP status.
    #[error("HTTP {status} for {path}: {message}")]
    Http {
        path: String,
        status: u16,
        message: String,
    },

    /// The request never got an answer.
    #[error("Transport error for {path}: {message}")]
    Transport { path: String, message: String },
}

impl ControllerError {
    /// "Already exists" and "not found" are expected when calls are
    /// replayed.
    pub fn is_tolerable(&self) -> bool {
        matches!(
            self,
            ControllerError::NotFound { .. } | ControllerError::AlreadyExists { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound { .. })
    }

    fn path(&self) -> &str {
        match self {
            ControllerError::NotFound { path }
            | ControllerError::AlreadyExists { path }
            | ControllerError::Http { path, .. }
            | ControllerError::Transport { path, .. } => path,
        }
    }
}

impl From<ControllerError> for OvsNetError {
    fn from(e: ControllerError) -> Self {
        OvsNetError::controller(e.path().to_string(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerable() {
        assert!(ControllerError::NotFound { path: "/x".into() }.is_tolerable());
        assert!(ControllerError::AlreadyExists { path: "/x".into() }.is_tolerable());
        assert!(!ControllerError::Transport {
            path: "/x".into(),
            message: "refused".into()
        }
        .is_tolerable());
    }

    #[test]
    fn test_into_ovsnet_error() {
        let err: OvsNetError = ControllerError::Http {
            path: "/v1.0/networks/n1".into(),
            status: 500,
            message: "boom".into(),
        }
        .into();
        match err {
            OvsNetError::Controller { operation, message } => {
                assert_eq!(operation, "/v1.0/networks/n1");
                assert!(message.contains("HTTP 500"));
            }
            other => panic!("Expected Controller error, got {:?}", other),
        }
    }
}
