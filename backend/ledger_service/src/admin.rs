//! Admin back office: account management, manual credits, ledger search,
//! audit and dashboard figures.

use ledger_core::invariants::{self, BalanceAudit};
use ledger_core::{
    Account, AccountId, AccountStatus, AdminId, Amount, EntryMeta, LedgerError, Result,
    Transaction, TransactionId, TxStatus, TxType,
};
use serde::Serialize;
use tracing::info;

use crate::accounts::{self, Referral};
use crate::db::{self, AccountRow, TransactionRow, ACCOUNT_COLUMNS, TRANSACTION_COLUMNS};
use crate::errors::storage_error;
use crate::ledger::{self, NewEntry};
use crate::platform::Platform;
use crate::plans;

/// Upper bound on rows returned by the transaction search.
const SEARCH_LIMIT: i64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditReceipt {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub new_balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_accounts: i64,
    pub blocked_accounts: i64,
    pub pending_deposits: i64,
    pub pending_withdrawals: i64,
    pub total_balance: Amount,
}

/// One account as the back office sees it.
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub account: Account,
    pub referrer_email: Option<String>,
    pub active_plan_name: Option<String>,
    pub transactions: Vec<Transaction>,
    pub referrals: Vec<Referral>,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_accounts: i64,
    blocked_accounts: i64,
    total_balance: i64,
    pending_deposits: i64,
    pending_withdrawals: i64,
}

fn search_term(term: Option<String>) -> Option<String> {
    term.map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty())
}

impl Platform {
    /// Accounts matching `search` on name, email or referral code, newest
    /// first. No search lists everyone.
    pub async fn list_accounts(&self, search: Option<String>) -> Result<Vec<Account>> {
        let term = search_term(search);
        self.store
            .unit_of_work("list_accounts", move |conn| {
                let term = term.clone();
                Box::pin(async move {
                    let rows: Vec<AccountRow> = sqlx::query_as(&format!(
                        r#"
                        SELECT {ACCOUNT_COLUMNS}
                        FROM   accounts
                        WHERE  ?1 IS NULL
                           OR  instr(lower(name), ?1) > 0
                           OR  instr(lower(email), ?1) > 0
                           OR  instr(lower(referral_code), ?1) > 0
                        ORDER  BY created_at DESC, id DESC
                        "#
                    ))
                    .bind(term)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(storage_error)?;
                    db::convert_all(rows)
                })
            })
            .await
    }

    /// Profile, referrer, plan, ledger and referrals of one account, read
    /// in a single unit of work.
    pub async fn account_detail(&self, account_id: AccountId) -> Result<AccountDetail> {
        self.store
            .unit_of_work("account_detail", move |conn| {
                Box::pin(async move {
                    let account = ledger::fetch_account(conn, account_id).await?;
                    let referrer_email = match account.referred_by {
                        Some(referrer) => Some(ledger::fetch_account(conn, referrer).await?.email),
                        None => None,
                    };
                    let active_plan_name = match account.active_plan_id {
                        Some(plan_id) => Some(plans::fetch_plan(conn, plan_id).await?.name),
                        None => None,
                    };
                    let transactions = accounts::history_of(conn, account_id).await?;
                    let referrals = accounts::referrals_of(conn, account_id).await?;
                    Ok(AccountDetail {
                        account,
                        referrer_email,
                        active_plan_name,
                        transactions,
                        referrals,
                    })
                })
            })
            .await
    }

    pub async fn set_account_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Account> {
        let clock = self.clock.clone();
        let account = self
            .store
            .unit_of_work("set_account_status", move |conn| {
                let now = db::to_millis(clock.now());
                Box::pin(async move {
                    let touched = sqlx::query(
                        "UPDATE accounts SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    )
                    .bind(status.as_str())
                    .bind(now)
                    .bind(account_id)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage_error)?
                    .rows_affected();
                    if touched == 0 {
                        return Err(LedgerError::AccountNotFound(account_id));
                    }
                    ledger::fetch_account(conn, account_id).await
                })
            })
            .await?;

        info!("Account {account_id} is now {}", status.as_str());
        Ok(account)
    }

    /// Credit an account outside the request workflow.
    pub async fn admin_credit(
        &self,
        account_id: AccountId,
        amount: Amount,
        reason: String,
        admin_id: AdminId,
    ) -> Result<CreditReceipt> {
        amount.require_positive("credit amount")?;
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(LedgerError::Validation("a reason is required".into()));
        }
        let clock = self.clock.clone();

        let receipt = self
            .store
            .unit_of_work("admin_credit", move |conn| {
                let clock = clock.clone();
                let reason = reason.clone();
                Box::pin(async move {
                    let account = ledger::lock_account(conn, account_id).await?;
                    let now = clock.now();
                    let new_balance = ledger::adjust_balance(conn, account.id, amount, now).await?;
                    let transaction_id = ledger::record(
                        conn,
                        NewEntry {
                            account_id: account.id,
                            tx_type: TxType::AdminAdjustment,
                            amount,
                            status: TxStatus::Completed,
                            processed_by: Some(admin_id),
                            description: format!("Admin credit: {reason}"),
                            meta: EntryMeta {
                                method: Some("Admin".to_string()),
                                ..EntryMeta::default()
                            },
                        },
                        now,
                    )
                    .await?;

                    Ok(CreditReceipt {
                        transaction_id,
                        account_id: account.id,
                        amount,
                        new_balance,
                    })
                })
            })
            .await?;

        info!(
            "Admin {admin_id} credited {} PKR to account {account_id} (entry {})",
            receipt.amount, receipt.transaction_id
        );
        Ok(receipt)
    }

    /// Replay an account's ledger against its stored balance.
    pub async fn audit_account(&self, account_id: AccountId) -> Result<BalanceAudit> {
        let audit = self
            .store
            .unit_of_work("audit_account", move |conn| {
                Box::pin(async move {
                    let account = ledger::fetch_account(conn, account_id).await?;
                    let entries = ledger::entries_for(conn, account_id).await?;
                    invariants::audit_account(&account, &entries)
                })
            })
            .await?;
        if !audit.consistent {
            tracing::error!(
                "Account {account_id} balance {} disagrees with its ledger ({})",
                audit.stored_balance,
                audit.replayed_balance
            );
        }
        Ok(audit)
    }

    /// Ledger entries of every account, newest first, optionally filtered by
    /// type, status, description, method or external reference.
    pub async fn search_transactions(&self, term: Option<String>) -> Result<Vec<Transaction>> {
        let term = search_term(term);
        self.store
            .unit_of_work("search_transactions", move |conn| {
                let term = term.clone();
                Box::pin(async move {
                    let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
                        r#"
                        SELECT {TRANSACTION_COLUMNS}
                        FROM   transactions
                        WHERE  ?1 IS NULL
                           OR  instr(lower(tx_type), ?1) > 0
                           OR  instr(lower(status), ?1) > 0
                           OR  instr(lower(description), ?1) > 0
                           OR  instr(lower(coalesce(method, '')), ?1) > 0
                           OR  instr(lower(coalesce(external_reference, '')), ?1) > 0
                        ORDER  BY created_at DESC, id DESC
                        LIMIT  ?2
                        "#
                    ))
                    .bind(term)
                    .bind(SEARCH_LIMIT)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(storage_error)?;
                    db::convert_all(rows)
                })
            })
            .await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        self.store
            .unit_of_work("dashboard_stats", |conn| {
                Box::pin(async move {
                    let row: StatsRow = sqlx::query_as(
                        r#"
                        SELECT
                            (SELECT COUNT(*) FROM accounts) AS total_accounts,
                            (SELECT COUNT(*) FROM accounts WHERE status = 'Blocked') AS blocked_accounts,
                            (SELECT COALESCE(SUM(balance), 0) FROM accounts) AS total_balance,
                            (SELECT COUNT(*) FROM transactions
                              WHERE tx_type = 'Deposit' AND status = 'Pending') AS pending_deposits,
                            (SELECT COUNT(*) FROM transactions
                              WHERE tx_type = 'Withdrawal' AND status = 'Pending') AS pending_withdrawals
                        "#,
                    )
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(storage_error)?;
                    Ok(DashboardStats {
                        total_accounts: row.total_accounts,
                        blocked_accounts: row.blocked_accounts,
                        pending_deposits: row.pending_deposits,
                        pending_withdrawals: row.pending_withdrawals,
                        total_balance: Amount::from_minor(row.total_balance),
                    })
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceUpload;
    use crate::platform::testing::{fixture, ADMIN};

    #[tokio::test]
    async fn search_accounts_by_name_email_or_code() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let b = f.signup("Bilal", None).await;

        let all = f.platform.list_accounts(None).await.unwrap();
        assert_eq!(all.iter().map(|x| x.id).collect::<Vec<_>>(), [b.id, a.id]);

        let found = f.platform.list_accounts(Some("AYE".into())).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let by_code = f
            .platform
            .list_accounts(Some(b.referral_code.to_lowercase()))
            .await
            .unwrap();
        assert!(by_code.iter().any(|x| x.id == b.id));

        let blank = f.platform.list_accounts(Some("   ".into())).await.unwrap();
        assert_eq!(blank.len(), 2);
    }

    #[tokio::test]
    async fn account_detail_shows_referrer_plan_ledger_and_referrals() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let b = f.signup("Bilal", Some(&a.referral_code)).await;
        let c = f.signup("Chand", Some(&b.referral_code)).await;
        let silver = f.plan("Silver", 500, 25).await;
        f.fund(b.id, 600).await;
        f.platform.invest(b.id, silver.id).await.unwrap();

        let detail = f.platform.account_detail(b.id).await.unwrap();
        assert_eq!(detail.account.id, b.id);
        assert_eq!(detail.referrer_email.as_deref(), Some(a.email.as_str()));
        assert_eq!(detail.active_plan_name.as_deref(), Some("Silver"));
        assert_eq!(
            detail
                .transactions
                .iter()
                .map(|t| t.tx_type)
                .collect::<Vec<_>>(),
            [TxType::Investment, TxType::Deposit]
        );
        assert_eq!(
            detail.referrals.iter().map(|r| r.id).collect::<Vec<_>>(),
            [c.id]
        );

        let bare = f.platform.account_detail(a.id).await.unwrap();
        assert_eq!(bare.referrer_email, None);
        assert_eq!(bare.active_plan_name, None);
        assert_eq!(bare.referrals.len(), 1);

        assert_eq!(
            f.platform.account_detail(404).await.unwrap_err(),
            LedgerError::AccountNotFound(404)
        );
    }

    #[tokio::test]
    async fn block_and_unblock() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let blocked = f
            .platform
            .set_account_status(a.id, AccountStatus::Blocked)
            .await
            .unwrap();
        assert_eq!(blocked.status, AccountStatus::Blocked);
        let active = f
            .platform
            .set_account_status(a.id, AccountStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.status, AccountStatus::Active);
        assert_eq!(
            f.platform
                .set_account_status(404, AccountStatus::Blocked)
                .await
                .unwrap_err(),
            LedgerError::AccountNotFound(404)
        );
    }

    #[tokio::test]
    async fn pending_requests_of_blocked_accounts_can_still_be_decided() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let id = f
            .platform
            .request_deposit(
                a.id,
                Amount::from_pkr(300),
                "Easypaisa".into(),
                None,
                EvidenceUpload {
                    file_name: "p.png".into(),
                    bytes: vec![1],
                },
            )
            .await
            .unwrap();
        f.platform
            .set_account_status(a.id, AccountStatus::Blocked)
            .await
            .unwrap();
        let decision = f.platform.approve_deposit(id, ADMIN).await.unwrap();
        assert_eq!(decision.new_balance, Amount::from_pkr(300));
    }

    #[tokio::test]
    async fn admin_credit_is_recorded_and_audited() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let receipt = f
            .platform
            .admin_credit(a.id, Amount::from_pkr(75), "promo".into(), ADMIN)
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Amount::from_pkr(75));

        let history = f.platform.transaction_history(a.id).await.unwrap();
        assert_eq!(history[0].tx_type, TxType::AdminAdjustment);
        assert_eq!(history[0].processed_by, Some(ADMIN));
        assert_eq!(history[0].processed_at, Some(history[0].created_at));

        let audit = f.platform.audit_account(a.id).await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.replayed_balance, Amount::from_pkr(75));
        assert_eq!(audit.entries, 1);

        assert!(matches!(
            f.platform
                .admin_credit(a.id, Amount::from_pkr(-5), "oops".into(), ADMIN)
                .await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            f.platform
                .admin_credit(a.id, Amount::from_pkr(5), " ".into(), ADMIN)
                .await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn audit_flags_a_tampered_balance() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 100).await;
        sqlx::query("UPDATE accounts SET balance = balance + 1 WHERE id = ?1")
            .bind(a.id)
            .execute(f.platform.store.pool())
            .await
            .unwrap();
        let audit = f.platform.audit_account(a.id).await.unwrap();
        assert!(!audit.consistent);
        assert_eq!(audit.stored_balance, Amount::from_minor(10_001));
        assert_eq!(audit.replayed_balance, Amount::from_pkr(100));
    }

    #[tokio::test]
    async fn search_and_stats() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 300).await;
        f.platform
            .request_deposit(
                a.id,
                Amount::from_pkr(50),
                "JazzCash".into(),
                Some("TID-XYZ".into()),
                EvidenceUpload {
                    file_name: "p.png".into(),
                    bytes: vec![1],
                },
            )
            .await
            .unwrap();

        let hits = f
            .platform
            .search_transactions(Some("tid-xyz".into()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, TxStatus::Pending);

        let everything = f.platform.search_transactions(None).await.unwrap();
        assert_eq!(everything.len(), 2);

        let stats = f.platform.dashboard_stats().await.unwrap();
        assert_eq!(
            stats,
            DashboardStats {
                total_accounts: 1,
                blocked_accounts: 0,
                pending_deposits: 1,
                pending_withdrawals: 0,
                total_balance: Amount::from_pkr(300),
            }
        );
    }
}
