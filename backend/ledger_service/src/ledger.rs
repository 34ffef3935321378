//! Ledger store and transaction recorder.
//!
//! Every function takes the unit-of-work connection, so a balance change
//! and the entry explaining it always commit together.

use chrono::{DateTime, Utc};
use ledger_core::{
    Account, AccountId, AdminId, Amount, EntryMeta, LedgerError, Result, Transaction,
    TransactionId, TxStatus, TxType,
};
use sqlx::SqliteConnection;

use crate::db::{self, AccountRow, TransactionRow, ACCOUNT_COLUMNS, TRANSACTION_COLUMNS};
use crate::errors::storage_error;

// ─────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────

/// Read an account without locking it.
pub async fn fetch_account(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Account> {
    let row: Option<AccountRow> =
        sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"))
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_error)?;
    row.ok_or(LedgerError::AccountNotFound(account_id))?
        .try_into()
}

/// Take the write lock through the account row, then read it.
///
/// Must be the first statement of a mutating unit of work.
pub async fn lock_account(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Account> {
    let touched = sqlx::query("UPDATE accounts SET updated_at = updated_at WHERE id = ?1")
        .bind(account_id)
        .execute(&mut *conn)
        .await
        .map_err(storage_error)?
        .rows_affected();
    if touched == 0 {
        return Err(LedgerError::AccountNotFound(account_id));
    }
    fetch_account(conn, account_id).await
}

pub async fn get_balance(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Amount> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM accounts WHERE id = ?1")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;
    row.map(|(b,)| Amount::from_minor(b))
        .ok_or(LedgerError::AccountNotFound(account_id))
}

/// Apply `delta` to a balance and return the new balance.
///
/// Callers pre-check sufficiency; the guarded update is the final word and
/// never lets a balance go negative.
pub async fn adjust_balance(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    delta: Amount,
    now: DateTime<Utc>,
) -> Result<Amount> {
    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET    balance = balance + ?1, updated_at = ?3
        WHERE  id = ?2 AND balance + ?1 >= 0
        RETURNING balance
        "#,
    )
    .bind(delta.minor())
    .bind(account_id)
    .bind(db::to_millis(now))
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_error)?;

    match updated {
        Some((balance,)) => Ok(Amount::from_minor(balance)),
        None => {
            let balance = get_balance(conn, account_id).await?;
            Err(LedgerError::InsufficientFunds {
                balance,
                required: delta.checked_neg().unwrap_or(delta),
            })
        }
    }
}

/// Number of accounts referred by `account_id` that have invested.
pub async fn investing_referral_count(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM accounts WHERE referred_by = ?1 AND has_made_first_investment = 1",
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(storage_error)?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Transaction recorder
// ─────────────────────────────────────────────────────────

/// A ledger entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub tx_type: TxType,
    pub amount: Amount,
    pub status: TxStatus,
    /// Admin who made a final entry directly; stamped with the entry time.
    pub processed_by: Option<AdminId>,
    pub description: String,
    pub meta: EntryMeta,
}

/// Append an entry. Rejects combinations outside the type/status vocabulary.
pub async fn record(
    conn: &mut SqliteConnection,
    entry: NewEntry,
    now: DateTime<Utc>,
) -> Result<TransactionId> {
    entry.tx_type.validate_entry(entry.status)?;
    if entry.amount.is_negative() {
        return Err(LedgerError::InvalidAmount(
            "ledger amounts are stored as magnitudes".into(),
        ));
    }

    if entry.processed_by.is_some() && entry.status == TxStatus::Pending {
        return Err(LedgerError::InvalidState(
            "a pending entry cannot carry a processing admin".into(),
        ));
    }

    let created_at = db::to_millis(now);
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO transactions
            (account_id, tx_type, amount, status, description,
             method, external_reference, evidence_ref, destination, created_at,
             processed_by, processed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        RETURNING id
        "#,
    )
    .bind(entry.account_id)
    .bind(entry.tx_type.as_str())
    .bind(entry.amount.minor())
    .bind(entry.status.as_str())
    .bind(&entry.description)
    .bind(&entry.meta.method)
    .bind(&entry.meta.external_reference)
    .bind(&entry.meta.evidence_ref)
    .bind(&entry.meta.destination)
    .bind(created_at)
    .bind(entry.processed_by)
    .bind(entry.processed_by.map(|_| created_at))
    .fetch_one(&mut *conn)
    .await
    .map_err(storage_error)?;
    Ok(id)
}

/// Move a pending request of `kind` to `outcome`, stamping the admin.
///
/// The conditional update doubles as the lock: of two concurrent claims on
/// the same id, only one finds the row still `Pending`.
pub async fn claim_pending(
    conn: &mut SqliteConnection,
    transaction_id: TransactionId,
    kind: TxType,
    outcome: TxStatus,
    admin_id: AdminId,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    if !kind.is_request() || !TxStatus::Pending.can_transition_to(outcome) {
        return Err(LedgerError::InvalidState(format!(
            "{kind} entries cannot move from Pending to {outcome}"
        )));
    }

    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        r#"
        UPDATE transactions
        SET    status = ?1, processed_by = ?2, processed_at = ?3
        WHERE  id = ?4 AND tx_type = ?5 AND status = 'Pending'
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(outcome.as_str())
    .bind(admin_id)
    .bind(db::to_millis(now))
    .bind(transaction_id)
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_error)?;

    row.ok_or(LedgerError::TransactionNotFound {
        id: transaction_id,
        kind,
    })?
    .try_into()
}

/// All entries owned by an account, oldest first.
pub async fn entries_for(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Vec<Transaction>> {
    let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?1 ORDER BY id ASC"
    ))
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage_error)?;
    db::convert_all(rows)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::store::Store;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    async fn store_with_account(balance: i64) -> Store {
        let pool = db::init_pool("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO accounts (id, name, email, balance, referral_code, created_at, updated_at)
             VALUES (1, 'Ayesha', 'ayesha@example.com', ?1, 'AAAA1111', 0, 0)",
        )
        .bind(balance)
        .execute(&pool)
        .await
        .unwrap();
        Store::new(pool, Duration::from_secs(1), 0)
    }

    #[tokio::test]
    async fn adjust_balance_refuses_to_go_negative() {
        let store = store_with_account(1_000).await;
        let err = store
            .unit_of_work("adjust", |conn| {
                Box::pin(async move {
                    adjust_balance(conn, 1, Amount::from_minor(-1_500), now()).await
                })
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                balance: Amount::from_minor(1_000),
                required: Amount::from_minor(1_500),
            }
        );

        let balance = store
            .unit_of_work("adjust", |conn| {
                Box::pin(async move {
                    adjust_balance(conn, 1, Amount::from_minor(-400), now()).await
                })
            })
            .await
            .unwrap();
        assert_eq!(balance, Amount::from_minor(600));
    }

    #[tokio::test]
    async fn adjust_balance_reports_missing_accounts() {
        let store = store_with_account(0).await;
        let err = store
            .unit_of_work("adjust", |conn| {
                Box::pin(async move { adjust_balance(conn, 42, Amount::from_pkr(1), now()).await })
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(42));
    }

    #[tokio::test]
    async fn recorder_enforces_the_vocabulary() {
        let store = store_with_account(0).await;
        let err = store
            .unit_of_work("record", |conn| {
                Box::pin(async move {
                    record(
                        conn,
                        NewEntry {
                            account_id: 1,
                            tx_type: TxType::DailyEarnings,
                            amount: Amount::from_pkr(25),
                            status: TxStatus::Pending,
                            processed_by: None,
                            description: String::new(),
                            meta: EntryMeta::default(),
                        },
                        now(),
                    )
                    .await
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn final_entries_carry_their_admin_from_the_insert() {
        let store = store_with_account(0).await;
        let entry = |status| NewEntry {
            account_id: 1,
            tx_type: TxType::AdminAdjustment,
            amount: Amount::from_pkr(10),
            status,
            processed_by: Some(9),
            description: "credit".into(),
            meta: EntryMeta::default(),
        };

        let stamped = store
            .unit_of_work("record", move |conn| {
                let entry = entry(TxStatus::Completed);
                Box::pin(async move {
                    let id = record(conn, entry, now()).await?;
                    entries_for(conn, 1)
                        .await
                        .map(|all| all.into_iter().find(|t| t.id == id))
                })
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stamped.processed_by, Some(9));
        assert_eq!(stamped.processed_at, Some(now()));

        let err = store
            .unit_of_work("record", move |conn| {
                let entry = NewEntry {
                    tx_type: TxType::Deposit,
                    ..entry(TxStatus::Pending)
                };
                Box::pin(async move { record(conn, entry, now()).await })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn pending_entries_are_claimed_once() {
        let store = store_with_account(0).await;
        let id = store
            .unit_of_work("record", |conn| {
                Box::pin(async move {
                    record(
                        conn,
                        NewEntry {
                            account_id: 1,
                            tx_type: TxType::Deposit,
                            amount: Amount::from_pkr(300),
                            status: TxStatus::Pending,
                            processed_by: None,
                            description: "deposit".into(),
                            meta: EntryMeta::default(),
                        },
                        now(),
                    )
                    .await
                })
            })
            .await
            .unwrap();

        // Wrong queue.
        let wrong = store
            .unit_of_work("claim", move |conn| {
                Box::pin(async move {
                    claim_pending(conn, id, TxType::Withdrawal, TxStatus::Approved, 9, now()).await
                })
            })
            .await;
        assert!(matches!(wrong, Err(LedgerError::TransactionNotFound { .. })));

        let claimed = store
            .unit_of_work("claim", move |conn| {
                Box::pin(async move {
                    claim_pending(conn, id, TxType::Deposit, TxStatus::Rejected, 9, now()).await
                })
            })
            .await
            .unwrap();
        assert_eq!(claimed.status, TxStatus::Rejected);
        assert_eq!(claimed.processed_by, Some(9));
        assert_eq!(claimed.processed_at, Some(now()));

        let again = store
            .unit_of_work("claim", move |conn| {
                Box::pin(async move {
                    claim_pending(conn, id, TxType::Deposit, TxStatus::Approved, 9, now()).await
                })
            })
            .await;
        assert!(matches!(again, Err(LedgerError::TransactionNotFound { .. })));
    }

    #[tokio::test]
    async fn completed_is_not_a_request_outcome() {
        let store = store_with_account(0).await;
        let err = store
            .unit_of_work("claim", |conn| {
                Box::pin(async move {
                    claim_pending(conn, 1, TxType::Deposit, TxStatus::Completed, 9, now()).await
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }
}
