use thiserror::Error;

use crate::{database::DatabaseError, wireguard::ParseError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("client '{0}' already exists")]
    AlreadyExists(String),
    #[error("client '{0}' not found")]
    NotFound(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("access denied")]
    AccessDenied,
    #[error("script failed: {0}")]
    ScriptExecution(String),
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("wireguard is already installed")]
    AlreadyInstalled,
    #[error("wireguard is not installed")]
    NotInstalled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Unexpected(e.to_string())
    }
}
