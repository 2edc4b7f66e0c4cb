//! # Store Error Types
//!
//! thiserror-based errors for document store operations. Version conflicts are
//! not errors: they come back as [`BulkItemStatus::Conflict`](super::BulkItemStatus)
//! outcomes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection error: {message}")]
    Connection { message: String },

    #[error("Store operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Store query error: {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("Document serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Timeouts and connectivity failures are requeue-safe
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. } | StoreError::Timeout { .. } | StoreError::Unavailable { .. }
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::timeout("database_pool", 30_000),
            sqlx::Error::PoolClosed => StoreError::unavailable("Database pool is closed"),
            sqlx::Error::Io(io) => StoreError::connection(io.to_string()),
            sqlx::Error::Tls(tls) => StoreError::connection(tls.to_string()),
            sqlx::Error::Database(db_err) => StoreError::query("database", db_err.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::serialization(format!("column {index}: {source}"))
            }
            other => StoreError::query("query", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
