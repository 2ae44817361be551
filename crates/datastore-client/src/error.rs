//! Datastore client errors

use thiserror::Error;

/// Errors that can occur when talking to a datastore backend
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// Driver-level failure (connection, query, protocol)
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx_core::Error),

    /// The backend rejected or failed the statement
    #[error("query failed: {0}")]
    Query(String),

    /// Name cannot be used as a schema or role identifier
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    /// No connection implementation for this driver
    #[error("unsupported datastore driver: {0}")]
    UnsupportedDriver(String),

    /// Connection parameters are incomplete or malformed
    #[error("invalid connection configuration: {0}")]
    InvalidConfig(String),
}
