//! Error types for the Shelf SDK.

use crate::remote::RemoteError;
use shelf_state::StateError;
use std::fmt;

/// Error type for SDK operations.
#[derive(Debug)]
pub enum SdkError {
    /// Local state rejected the call.
    State(StateError),
    /// The remote store failed or refused the request.
    Remote(RemoteError),
    /// The object has no server id yet.
    NotSaved(String),
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::State(e) => write!(f, "State error: {}", e),
            SdkError::Remote(e) => write!(f, "Remote error: {}", e),
            SdkError::NotSaved(id) => write!(f, "Object not saved yet: {}", id),
        }
    }
}

impl std::error::Error for SdkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdkError::State(e) => Some(e),
            SdkError::Remote(e) => Some(e),
            SdkError::NotSaved(_) => None,
        }
    }
}

impl From<StateError> for SdkError {
    fn from(e: StateError) -> Self {
        SdkError::State(e)
    }
}

impl From<RemoteError> for SdkError {
    fn from(e: RemoteError) -> Self {
        SdkError::Remote(e)
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
