use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object '{key}' was not found.")]
    NotFound { key: String },
    #[error("Cannot copy '{filename}' onto itself in folder '{folder}'.")]
    CopyToSelf { folder: String, filename: String },
    #[error("Storage service error during {operation} on '{key}': {source}")]
    Service {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Failed to gzip body for '{key}': {source}")]
    Compress {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to gunzip body of '{key}': {source}")]
    Decompress {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Body of '{key}' is not valid UTF-8: {source}")]
    InvalidUtf8 {
        key: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Local file error on {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Object '{key}' has no usable last-modified timestamp.")]
    MissingTimestamp { key: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
