//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for jobtrack_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => jobtrack_core::Error::NotFound(msg),
            other => jobtrack_core::Error::StoreUnavailable(other.to_string()),
        }
    }
}
