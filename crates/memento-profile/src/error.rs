use thiserror::Error;

use memento_core::error::MementoError;

/// Errors that can occur while building a preference profile.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("store error: {0}")]
    Store(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("narrative error: {0}")]
    Narrative(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

impl From<ProfileError> for MementoError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::Narrative(msg) => MementoError::Narrative(msg),
            other => MementoError::Profile(other.to_string()),
        }
    }
}
