use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Column {column} has type {type_name}, which cannot be archived")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("Primary key column {column} is missing or has an unusable value: {reason}")]
    InvalidKey { column: String, reason: String },

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
