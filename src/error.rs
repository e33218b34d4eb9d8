//! Error taxonomy for the stores and the data service

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a [`RemoteDataService`](crate::remote::RemoteDataService)
/// or [`FileStore`](crate::remote::FileStore)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("file storage failed: {0}")]
    Storage(String),
}

impl RemoteError {
    pub fn backend(msg: impl Into<String>) -> Self {
        RemoteError::Backend(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        RemoteError::Rejected(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        RemoteError::Storage(msg.into())
    }
}

impl From<rusqlite::Error> for RemoteError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => RemoteError::Rejected("no matching row".into()),
            other => RemoteError::Backend(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Storage(err.to_string())
    }
}

/// Errors surfaced by the stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("please sign in to continue")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("no record with id {0}")]
    NotFound(Uuid),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Whether the user should see this error
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, CoreError::NotFound(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
