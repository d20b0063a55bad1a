//! Batch store error types

use delivery_core::CoreError;
use thiserror::Error;

/// Failures of a batch store backend
#[derive(Error, Debug)]
pub enum DbError {
    #[error("cannot reach store: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("malformed stored row: {0}")]
    Serialization(String),

    #[error("no such record: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("invalid store configuration: {0}")]
    Configuration(String),

    #[error("store timed out: {0}")]
    Timeout(String),
}

impl DbError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn duplicate(what: impl Into<String>) -> Self {
        Self::Duplicate(what.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Query(_))
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
