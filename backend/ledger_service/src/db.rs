//! Database layer: pool setup, migrations and typed row mapping.
//!
//! Rows are decoded into `*Row` structs and converted into the typed
//! records of `ledger_core` right here, so nothing above this module
//! handles raw columns.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledger_core::{
    Account, AccountStatus, Amount, EntryMeta, LedgerError, Plan, Transaction, TxStatus, TxType,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
///
/// An in-memory database lives inside a single connection, so the pool is
/// pinned to exactly one long-lived connection in that case.
pub async fn init_pool(database_url: &str, busy_timeout: Duration) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .acquire_timeout(busy_timeout)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Timestamp helpers
// ─────────────────────────────────────────────────────────

pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub fn from_millis(millis: i64) -> ledger_core::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| LedgerError::StorageUnavailable(format!("corrupt timestamp {millis}")))
}

fn from_millis_opt(millis: Option<i64>) -> ledger_core::Result<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

/// A stored value that no longer parses means the row is corrupt, not that
/// the caller asked for something invalid.
fn corrupt(err: LedgerError) -> LedgerError {
    LedgerError::StorageUnavailable(format!("corrupt row: {err}"))
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

pub const ACCOUNT_COLUMNS: &str = "id, name, email, balance, status, referral_code, referred_by, \
     has_made_first_investment, active_plan_id, last_check_in, created_at";

#[derive(Debug, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub balance: i64,
    pub status: String,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub has_made_first_investment: bool,
    pub active_plan_id: Option<i64>,
    pub last_check_in: Option<i64>,
    pub created_at: i64,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> ledger_core::Result<Self> {
        Ok(Account {
            id: row.id,
            name: row.name,
            email: row.email,
            balance: Amount::from_minor(row.balance),
            status: AccountStatus::parse(&row.status).map_err(corrupt)?,
            referral_code: row.referral_code,
            referred_by: row.referred_by,
            has_made_first_investment: row.has_made_first_investment,
            active_plan_id: row.active_plan_id,
            last_check_in: from_millis_opt(row.last_check_in)?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

pub const PLAN_COLUMNS: &str =
    "id, name, investment_amount, daily_return, duration_days, description, is_active";

#[derive(Debug, sqlx::FromRow)]
pub struct PlanRow {
    pub id: i64,
    pub name: String,
    pub investment_amount: i64,
    pub daily_return: i64,
    pub duration_days: i64,
    pub description: Option<String>,
    pub is_active: bool,
}

impl TryFrom<PlanRow> for Plan {
    type Error = LedgerError;

    fn try_from(row: PlanRow) -> ledger_core::Result<Self> {
        Ok(Plan {
            id: row.id,
            name: row.name,
            investment_amount: Amount::from_minor(row.investment_amount),
            daily_return: Amount::from_minor(row.daily_return),
            duration_days: u32::try_from(row.duration_days).map_err(|_| {
                LedgerError::StorageUnavailable(format!(
                    "corrupt duration on plan {}",
                    row.id
                ))
            })?,
            description: row.description,
            is_active: row.is_active,
        })
    }
}

pub const TRANSACTION_COLUMNS: &str = "id, account_id, tx_type, amount, status, description, \
     method, external_reference, evidence_ref, destination, created_at, processed_by, processed_at";

#[derive(Debug, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub account_id: i64,
    pub tx_type: String,
    pub amount: i64,
    pub status: String,
    pub description: String,
    pub method: Option<String>,
    pub external_reference: Option<String>,
    pub evidence_ref: Option<String>,
    pub destination: Option<String>,
    pub created_at: i64,
    pub processed_by: Option<i64>,
    pub processed_at: Option<i64>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> ledger_core::Result<Self> {
        Ok(Transaction {
            id: row.id,
            account_id: row.account_id,
            tx_type: TxType::parse(&row.tx_type).map_err(corrupt)?,
            amount: Amount::from_minor(row.amount),
            status: TxStatus::parse(&row.status).map_err(corrupt)?,
            description: row.description,
            meta: EntryMeta {
                method: row.method,
                external_reference: row.external_reference,
                evidence_ref: row.evidence_ref,
                destination: row.destination,
            },
            created_at: from_millis(row.created_at)?,
            processed_by: row.processed_by,
            processed_at: from_millis_opt(row.processed_at)?,
        })
    }
}

/// Prefix every column of a `*_COLUMNS` list with a table alias, for joins.
pub fn qualified(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a batch of rows, failing on the first corrupt one.
pub fn convert_all<R, T>(rows: Vec<R>) -> ledger_core::Result<Vec<T>>
where
    T: TryFrom<R, Error = LedgerError>,
{
    rows.into_iter().map(T::try_from).collect()
}
