//! Core error types for doseminder-core.
//!
//! This module defines the error hierarchy using thiserror. Gateway and
//! engine failures are kept apart so callers can tell a rejected manual
//! confirmation from a programming mistake such as confirming twice.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for doseminder-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Remote adherence gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Adherence engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Dose history database errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the remote adherence gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport failure (connection refused, timeout, malformed body)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("Gateway returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The configured base URL cannot address medication resources
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// The service answered with data the engine cannot adopt
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// Any other failure reported by a gateway implementation
    #[error("{0}")]
    Unavailable(String),
}

/// Errors raised by the adherence engine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A gateway call is already in flight for this medication
    #[error("Medication '{medication_id}' is already resolving a dose")]
    AlreadyResolving { medication_id: String },

    /// The tracker was disposed and accepts no more commands
    #[error("Tracker for medication '{medication_id}' has been disposed")]
    Disposed { medication_id: String },
}

/// Dose history database errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Home directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Treatment window ends before it starts
    #[error("Invalid treatment window: period_end ({end}) is before period_start ({start})")]
    InvalidPeriod {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

impl ValidationError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
