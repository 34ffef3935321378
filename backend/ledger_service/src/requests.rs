//! Deposit and withdrawal requests and their admin approval.
//!
//! Each request is a ledger entry with a two-step life:
//!
//! ```text
//! request_*   → Pending        (no balance effect)
//! approve_*   → Approved       (balance credited / debited)
//! reject_*    → Rejected       (no balance effect)
//! ```
//!
//! Approval and rejection start with a conditional claim of the pending
//! row, so a request is decided at most once however many admins race.

use ledger_core::{
    AccountId, AdminId, Amount, EntryMeta, LedgerError, Result, Transaction, TransactionId,
    TxStatus, TxType,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{self, TransactionRow, TRANSACTION_COLUMNS};
use crate::errors::storage_error;
use crate::evidence::{discard_in_background, EvidenceUpload};
use crate::ledger::{self, NewEntry};
use crate::platform::Platform;

/// Outcome of an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub status: TxStatus,
    pub new_balance: Amount,
}

/// A pending request with its owner, as the admin queue shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub account_name: String,
    pub account_email: String,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    #[sqlx(flatten)]
    transaction: TransactionRow,
    account_name: String,
    account_email: String,
}

fn required(value: String, what: &str) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(LedgerError::Validation(format!("{what} is required")));
    }
    Ok(value)
}

impl Platform {
    /// File a deposit for admin review.
    ///
    /// The proof is stored first; if the ledger write then fails, the stored
    /// proof is released in the background.
    pub async fn request_deposit(
        &self,
        account_id: AccountId,
        amount: Amount,
        method: String,
        external_reference: Option<String>,
        evidence: EvidenceUpload,
    ) -> Result<TransactionId> {
        amount.require_positive("deposit amount")?;
        let method = required(method, "payment method")?;
        let external_reference = external_reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        evidence.validate()?;

        // Refuse unknown or blocked accounts before anything is written.
        self.get_account(account_id).await?.ensure_active()?;

        let evidence_ref = self.evidence.save(account_id, evidence).await?;
        let clock = self.clock.clone();
        let stored_ref = evidence_ref.clone();

        let recorded = self
            .store
            .unit_of_work("request_deposit", move |conn| {
                let clock = clock.clone();
                let method = method.clone();
                let external_reference = external_reference.clone();
                let evidence_ref = stored_ref.clone();
                Box::pin(async move {
                    let account = ledger::lock_account(conn, account_id).await?;
                    account.ensure_active()?;
                    let description = format!(
                        "Deposit request via {method}. TID: {}",
                        external_reference.as_deref().unwrap_or("N/A")
                    );
                    ledger::record(
                        conn,
                        NewEntry {
                            account_id,
                            tx_type: TxType::Deposit,
                            amount,
                            status: TxStatus::Pending,
                            processed_by: None,
                            description,
                            meta: EntryMeta {
                                method: Some(method),
                                external_reference,
                                evidence_ref: Some(evidence_ref),
                                destination: None,
                            },
                        },
                        clock.now(),
                    )
                    .await
                })
            })
            .await;

        match recorded {
            Ok(id) => {
                info!("Deposit {id} of {amount} PKR requested by account {account_id}");
                Ok(id)
            }
            Err(e) => {
                warn!("Deposit request for account {account_id} failed, releasing evidence: {e}");
                discard_in_background(self.evidence.clone(), evidence_ref);
                Err(e)
            }
        }
    }

    /// File a withdrawal for admin review.
    ///
    /// Checks run in order: referral gate, balance, platform minimum. A
    /// refused request leaves no ledger row.
    pub async fn request_withdrawal(
        &self,
        account_id: AccountId,
        amount: Amount,
        method: String,
        destination: String,
    ) -> Result<TransactionId> {
        amount.require_positive("withdrawal amount")?;
        let method = required(method, "payment method")?;
        let destination = required(destination, "destination account number")?;
        let minimum = self.min_withdrawal;
        let clock = self.clock.clone();

        let id = self
            .store
            .unit_of_work("request_withdrawal", move |conn| {
                let clock = clock.clone();
                let method = method.clone();
                let destination = destination.clone();
                Box::pin(async move {
                    let account = ledger::lock_account(conn, account_id).await?;
                    account.ensure_active()?;
                    if ledger::investing_referral_count(conn, account_id).await? == 0 {
                        return Err(LedgerError::ReferralRequirementNotMet);
                    }
                    account.ensure_covers(amount)?;
                    if amount < minimum {
                        return Err(LedgerError::BelowMinimum { amount, minimum });
                    }

                    ledger::record(
                        conn,
                        NewEntry {
                            account_id,
                            tx_type: TxType::Withdrawal,
                            amount,
                            status: TxStatus::Pending,
                            processed_by: None,
                            description: format!("Withdrawal request to {destination} via {method}"),
                            meta: EntryMeta {
                                method: Some(method),
                                external_reference: None,
                                evidence_ref: None,
                                destination: Some(destination),
                            },
                        },
                        clock.now(),
                    )
                    .await
                })
            })
            .await?;

        info!("Withdrawal {id} of {amount} PKR requested by account {account_id}");
        Ok(id)
    }

    /// Credit a pending deposit and mark it approved.
    pub async fn approve_deposit(&self, transaction_id: TransactionId, admin_id: AdminId) -> Result<Decision> {
        let decision = self
            .decide(transaction_id, TxType::Deposit, TxStatus::Approved, admin_id)
            .await?;
        info!(
            "Deposit {transaction_id} approved by admin {admin_id}: +{} PKR to account {}",
            decision.amount, decision.account_id
        );
        Ok(decision)
    }

    /// Reject a pending deposit and release its proof in the background.
    pub async fn reject_deposit(&self, transaction_id: TransactionId, admin_id: AdminId) -> Result<Transaction> {
        let (decision, rejected) = self
            .decide_with_entry(transaction_id, TxType::Deposit, TxStatus::Rejected, admin_id)
            .await?;
        info!(
            "Deposit {transaction_id} of account {} rejected by admin {admin_id}",
            decision.account_id
        );
        if let Some(reference) = rejected.meta.evidence_ref.clone() {
            discard_in_background(self.evidence.clone(), reference);
        }
        Ok(rejected)
    }

    /// Debit the account and mark the withdrawal approved.
    ///
    /// Fails with `InsufficientFunds`, leaving the request pending, when the
    /// balance has dropped below the amount since the request was filed.
    pub async fn approve_withdrawal(
        &self,
        transaction_id: TransactionId,
        admin_id: AdminId,
    ) -> Result<Decision> {
        let decision = self
            .decide(transaction_id, TxType::Withdrawal, TxStatus::Approved, admin_id)
            .await?;
        info!(
            "Withdrawal {transaction_id} approved by admin {admin_id}: -{} PKR from account {}",
            decision.amount, decision.account_id
        );
        Ok(decision)
    }

    pub async fn reject_withdrawal(
        &self,
        transaction_id: TransactionId,
        admin_id: AdminId,
    ) -> Result<Transaction> {
        let (decision, rejected) = self
            .decide_with_entry(transaction_id, TxType::Withdrawal, TxStatus::Rejected, admin_id)
            .await?;
        info!(
            "Withdrawal {transaction_id} of account {} rejected by admin {admin_id}",
            decision.account_id
        );
        Ok(rejected)
    }

    /// Pending requests of `kind`, oldest first.
    pub async fn list_pending(&self, kind: TxType) -> Result<Vec<PendingRequest>> {
        if !kind.is_request() {
            return Err(LedgerError::Validation(format!(
                "{kind} entries have no approval queue"
            )));
        }
        self.store
            .unit_of_work("list_pending", move |conn| {
                Box::pin(async move {
                    let rows: Vec<PendingRow> = sqlx::query_as(&format!(
                        r#"
                        SELECT {}, a.name AS account_name, a.email AS account_email
                        FROM   transactions t
                        JOIN   accounts a ON a.id = t.account_id
                        WHERE  t.tx_type = ?1 AND t.status = 'Pending'
                        ORDER  BY t.created_at ASC, t.id ASC
                        "#,
                        db::qualified(TRANSACTION_COLUMNS, "t")
                    ))
                    .bind(kind.as_str())
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(storage_error)?;

                    rows.into_iter()
                        .map(|row| {
                            Ok(PendingRequest {
                                transaction: row.transaction.try_into()?,
                                account_name: row.account_name,
                                account_email: row.account_email,
                            })
                        })
                        .collect()
                })
            })
            .await
    }

    async fn decide(
        &self,
        transaction_id: TransactionId,
        kind: TxType,
        outcome: TxStatus,
        admin_id: AdminId,
    ) -> Result<Decision> {
        self.decide_with_entry(transaction_id, kind, outcome, admin_id)
            .await
            .map(|(decision, _)| decision)
    }

    /// Claim the pending entry and apply its balance effect in one unit.
    async fn decide_with_entry(
        &self,
        transaction_id: TransactionId,
        kind: TxType,
        outcome: TxStatus,
        admin_id: AdminId,
    ) -> Result<(Decision, Transaction)> {
        let clock = self.clock.clone();
        self.store
            .unit_of_work("decide_request", move |conn| {
                let clock = clock.clone();
                Box::pin(async move {
                    let now = clock.now();
                    let entry =
                        ledger::claim_pending(conn, transaction_id, kind, outcome, admin_id, now)
                            .await?;

                    let delta = entry.balance_effect().ok_or_else(|| {
                        LedgerError::InvalidAmount(format!("entry {} overflows", entry.id))
                    })?;
                    let new_balance = if delta.is_zero() {
                        ledger::get_balance(conn, entry.account_id).await?
                    } else {
                        ledger::adjust_balance(conn, entry.account_id, delta, now).await?
                    };

                    let decision = Decision {
                        transaction_id: entry.id,
                        account_id: entry.account_id,
                        amount: entry.amount,
                        status: entry.status,
                        new_balance,
                    };
                    Ok((decision, entry))
                })
            })
            .await
    }
}
