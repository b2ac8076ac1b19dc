use thiserror::Error;

use super::{ConfigError, MessageError, PollError, QueueError, StorageError, TestIdError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Message error: {0}")]
    Message(#[from] MessageError),
    #[error("Test id error: {0}")]
    TestId(#[from] TestIdError),
    #[error("Poll error: {0}")]
    Poll(#[from] PollError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn queue<E>(error: E) -> Self
    where
        E: Into<QueueError>,
    {
        error.into().into()
    }

    pub fn storage<E>(error: E) -> Self
    where
        E: Into<StorageError>,
    {
        error.into().into()
    }

    pub fn message<E>(error: E) -> Self
    where
        E: Into<MessageError>,
    {
        error.into().into()
    }

    pub fn test_id<E>(error: E) -> Self
    where
        E: Into<TestIdError>,
    {
        error.into().into()
    }

    pub fn poll<E>(error: E) -> Self
    where
        E: Into<PollError>,
    {
        error.into().into()
    }

    /// True when the storage service reported that the object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, AppError::Storage(StorageError::NotFound { .. }))
    }
}
