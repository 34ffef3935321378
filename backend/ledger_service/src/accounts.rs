//! Account registration and account-scoped queries.

use ledger_core::{Account, AccountId, LedgerError, Result, Transaction};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::db::{self, AccountRow, TransactionRow, ACCOUNT_COLUMNS, TRANSACTION_COLUMNS};
use crate::errors::{storage_error, unique_violation_as};
use crate::platform::Platform;

const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    /// Code of the account that referred this signup.
    pub referral_code: Option<String>,
}

/// A referred account as its referrer sees it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Referral {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub has_made_first_investment: bool,
    pub signed_up_at: i64,
}

/// Eight uppercase hex characters.
pub fn generate_referral_code() -> String {
    let mut bytes = [0u8; REFERRAL_CODE_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

async fn find_by_referral_code(
    conn: &mut SqliteConnection,
    code: &str,
) -> Result<Option<AccountId>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM accounts WHERE referral_code = ?1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;
    Ok(row.map(|(id,)| id))
}

pub async fn referrals_of(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Vec<Referral>> {
    sqlx::query_as(
        r#"
        SELECT id, name, email, has_made_first_investment,
               created_at AS signed_up_at
        FROM   accounts
        WHERE  referred_by = ?1
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage_error)
}

pub async fn history_of(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Vec<Transaction>> {
    let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM   transactions
        WHERE  account_id = ?1
        ORDER  BY created_at DESC, id DESC
        "#
    ))
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage_error)?;
    db::convert_all(rows)
}

impl Platform {
    /// Create an account with a zero balance and a fresh referral code.
    ///
    /// An unknown referral code does not fail the signup; the account is
    /// simply created without a referrer.
    pub async fn register_account(&self, new: NewAccount) -> Result<Account> {
        let name = new.name.trim().to_string();
        let email = new.email.trim().to_lowercase();
        if name.is_empty() {
            return Err(LedgerError::Validation("name is required".into()));
        }
        if !email.contains('@') {
            return Err(LedgerError::Validation("a valid email is required".into()));
        }
        let referral_code = new
            .referral_code
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());
        let clock = self.clock.clone();

        let account: Account = self
            .store
            .unit_of_work("register_account", move |conn| {
                let name = name.clone();
                let email = email.clone();
                let referral_code = referral_code.clone();
                let now = db::to_millis(clock.now());
                Box::pin(async move {
                    let referred_by = match referral_code.as_deref() {
                        Some(code) => {
                            let found = find_by_referral_code(conn, code).await?;
                            if found.is_none() {
                                warn!("Referral code {code} not found, registering without referrer");
                            }
                            found
                        }
                        None => None,
                    };

                    let mut own_code = generate_referral_code();
                    let mut attempts = 1;
                    while find_by_referral_code(conn, &own_code).await?.is_some() {
                        if attempts == REFERRAL_CODE_ATTEMPTS {
                            return Err(LedgerError::StorageConflict(
                                "could not allocate a unique referral code".into(),
                            ));
                        }
                        own_code = generate_referral_code();
                        attempts += 1;
                    }

                    let row: AccountRow = sqlx::query_as(&format!(
                        r#"
                        INSERT INTO accounts
                            (name, email, referral_code, referred_by, created_at, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                        RETURNING {ACCOUNT_COLUMNS}
                        "#
                    ))
                    .bind(&name)
                    .bind(&email)
                    .bind(&own_code)
                    .bind(referred_by)
                    .bind(now)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(unique_violation_as("email already exists"))?;
                    row.try_into()
                })
            })
            .await?;

        info!(
            "Registered account {} (referred by {:?})",
            account.id, account.referred_by
        );
        Ok(account)
    }

    pub async fn get_account(&self, account_id: AccountId) -> Result<Account> {
        self.store
            .unit_of_work("get_account", move |conn| {
                Box::pin(async move { crate::ledger::fetch_account(conn, account_id).await })
            })
            .await
    }

    /// Accounts referred by `account_id`, newest first.
    pub async fn list_referrals(&self, account_id: AccountId) -> Result<Vec<Referral>> {
        self.store
            .unit_of_work("list_referrals", move |conn| {
                Box::pin(async move {
                    crate::ledger::fetch_account(conn, account_id).await?;
                    referrals_of(conn, account_id).await
                })
            })
            .await
    }

    /// Every ledger entry of an account, newest first.
    pub async fn transaction_history(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.store
            .unit_of_work("transaction_history", move |conn| {
                Box::pin(async move {
                    crate::ledger::fetch_account(conn, account_id).await?;
                    history_of(conn, account_id).await
                })
            })
            .await
    }
}
