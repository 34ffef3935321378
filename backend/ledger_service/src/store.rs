//! Unit of work over the SQLite pool.
//!
//! Every ledger operation runs as one closure handed a transactional
//! connection: `Ok` commits, `Err` (or a dropped future) rolls back. The
//! closure is re-run from scratch when the store reports a conflict, so it
//! must only capture owned, cloneable inputs.
//!
//! ## Locking
//!
//! SQLite has no row locks. A mutating unit starts with a write
//! (`ledger::lock_account` or a conditional claim of a pending entry), which
//! takes the database write lock until commit. Two units can therefore
//! never both read "eligible" and both write.

use std::time::Duration;

use futures::future::BoxFuture;
use ledger_core::{LedgerError, Result};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::errors::storage_error;

const RETRY_BACKOFF_MS: u64 = 25;

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    timeout: Duration,
    max_retries: u32,
}

impl Store {
    pub fn new(pool: SqlitePool, timeout: Duration, max_retries: u32) -> Self {
        Store {
            pool,
            timeout,
            max_retries,
        }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `op` atomically, retrying storage conflicts a bounded number of
    /// times.
    ///
    /// The timeout bounds `begin` and the closure body only. A timed-out
    /// attempt is rolled back and counts as a conflict; the commit runs
    /// outside the timer, so an attempt that reaches it is never reported
    /// as failed after landing.
    pub async fn unit_of_work<T, F>(&self, label: &'static str, mut op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, self.run(&mut op)).await {
                Ok(Ok((tx, value))) => tx.commit().await.map_err(storage_error).map(|()| value),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(LedgerError::StorageConflict(format!(
                    "{label} timed out after {:?}",
                    self.timeout
                ))),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                    warn!("{label}: attempt {attempt} hit a storage conflict, retrying: {err}");
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS * u64::from(attempt),
                    ))
                    .await;
                }
                other => {
                    if attempt > 1 {
                        debug!("{label}: settled after {attempt} attempts");
                    }
                    return other;
                }
            }
        }
    }

    /// Open a transaction and run `op` in it, handing back the open
    /// transaction for the caller to commit.
    async fn run<T, F>(&self, op: &mut F) -> Result<(sqlx::Transaction<'static, Sqlite>, T)>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let value = op(&mut *tx).await?;
        Ok((tx, value))
    }
}
