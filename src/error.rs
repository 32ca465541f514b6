//! Error types for the monitoring engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded back into a domain type.
    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    pub fn validation(message: impl Into<String>) -> Self {
        MonitorError::Validation(message.into())
    }
}
