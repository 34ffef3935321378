//! Service-level error types.
//!
//! Ledger operations fail with [`LedgerError`]; this module covers startup
//! failures and the translation of `sqlx` errors into the ledger taxonomy.

use ledger_core::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Classify a storage failure. Lock contention and pool exhaustion are
/// retryable conflicts; everything else makes the store unavailable for
/// this request.
pub fn storage_error(err: sqlx::Error) -> LedgerError {
    let conflict = match &err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    };
    if conflict {
        LedgerError::StorageConflict(err.to_string())
    } else {
        LedgerError::StorageUnavailable(err.to_string())
    }
}

/// Like [`storage_error`], but a unique-constraint violation becomes a
/// validation failure carrying `message`.
pub fn unique_violation_as(message: &str) -> impl Fn(sqlx::Error) -> LedgerError + '_ {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LedgerError::Validation(message.to_string())
        }
        _ => storage_error(err),
    }
}
