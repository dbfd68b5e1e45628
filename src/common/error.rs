//! Error types for minimeta

use crate::common::partition::PartitionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Addressing Errors ===
    #[error("Cannot resolve host: {0}")]
    Resolution(String),

    #[error("Stale handle: {0}")]
    StaleHandle(String),

    // === Idempotency conflicts ===
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    #[error("Member already present: {0}")]
    DuplicateMember(String),

    // === Request Errors ===
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // === Reconfiguration ===
    #[error("Stale ballot: proposed {proposed}, current {}", .current.ballot)]
    StaleBallot {
        proposed: i64,
        current: Box<PartitionConfig>,
    },

    // === Persistence Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage timeout: {0}")]
    Timeout(String),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error code carried in every administrative response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    ResolutionError,
    DuplicateName,
    DuplicateMember,
    MalformedRequest,
    StaleBallot,
    StorageError,
    NotFound,
    InvalidState,
    Internal,
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Only persistence failures qualify. A stale ballot is the expected
    /// rejection of a superseded message and resubmitting it cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Timeout(_) | Error::RocksDb(_) | Error::Io(_)
        )
    }

    pub fn is_stale_ballot(&self) -> bool {
        matches!(self, Error::StaleBallot { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Resolution(_) => ErrorCode::ResolutionError,
            Error::DuplicateName(_) => ErrorCode::DuplicateName,
            Error::DuplicateMember(_) => ErrorCode::DuplicateMember,
            Error::MalformedRequest(_) | Error::InvalidConfig(_) => ErrorCode::MalformedRequest,
            Error::StaleBallot { .. } => ErrorCode::StaleBallot,
            Error::Storage(_)
            | Error::Timeout(_)
            | Error::RocksDb(_)
            | Error::Io(_)
            | Error::Codec(_) => ErrorCode::StorageError,
            Error::NotFound(_) | Error::StaleHandle(_) => ErrorCode::NotFound,
            Error::InvalidState(_) => ErrorCode::InvalidState,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::Ok => StatusCode::OK,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MalformedRequest | ErrorCode::ResolutionError => StatusCode::BAD_REQUEST,
            ErrorCode::DuplicateName | ErrorCode::DuplicateMember | ErrorCode::StaleBallot => {
                StatusCode::CONFLICT
            }
            ErrorCode::InvalidState => StatusCode::PRECONDITION_FAILED,
            ErrorCode::StorageError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("background task failed: {}", e))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
