//! Investment engine: plan purchase and the first-investment referral bonus.
//!
//! The bonus is paid inside the same unit of work as the purchase. If the
//! referrer cannot be credited, the investment itself rolls back.

use ledger_core::referral::{bonus_recipient, referral_bonus};
use ledger_core::{
    AccountId, Amount, EntryMeta, LedgerError, PlanId, Result, TransactionId, TxStatus, TxType,
};
use serde::Serialize;
use tracing::info;

use crate::db;
use crate::ledger::{self, NewEntry};
use crate::plans::fetch_plan;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralPayout {
    pub referrer_id: AccountId,
    pub amount: Amount,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvestmentReceipt {
    pub transaction_id: TransactionId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub amount: Amount,
    pub new_balance: Amount,
    pub referral_bonus: Option<ReferralPayout>,
}

impl Platform {
    /// Buy `plan_id` for `account_id`.
    ///
    /// Debits the plan price, makes it the account's active plan, starts the
    /// check-in clock (so the first claim is possible the next calendar day)
    /// and, on the account's first investment, credits its referrer.
    pub async fn invest(&self, account_id: AccountId, plan_id: PlanId) -> Result<InvestmentReceipt> {
        let clock = self.clock.clone();

        let receipt = self
            .store
            .unit_of_work("invest", move |conn| {
                let clock = clock.clone();
                Box::pin(async move {
                    let account = ledger::lock_account(conn, account_id).await?;
                    account.ensure_active()?;

                    let plan = fetch_plan(conn, plan_id).await?;
                    if !plan.is_active {
                        return Err(LedgerError::PlanInactive(plan.id));
                    }
                    account.ensure_covers(plan.investment_amount)?;
                    if let Some(active) = account.active_plan_id {
                        return Err(LedgerError::AlreadyInvested { plan_id: active });
                    }

                    let now = clock.now();
                    let debit = plan
                        .investment_amount
                        .checked_neg()
                        .ok_or_else(|| LedgerError::InvalidAmount("plan price overflow".into()))?;
                    let new_balance = ledger::adjust_balance(conn, account.id, debit, now).await?;

                    sqlx::query(
                        r#"
                        UPDATE accounts
                        SET    active_plan_id = ?1,
                               has_made_first_investment = 1,
                               last_check_in = ?2,
                               updated_at = ?2
                        WHERE  id = ?3
                        "#,
                    )
                    .bind(plan.id)
                    .bind(db::to_millis(now))
                    .bind(account.id)
                    .execute(&mut *conn)
                    .await
                    .map_err(crate::errors::storage_error)?;

                    let transaction_id = ledger::record(
                        conn,
                        NewEntry {
                            account_id: account.id,
                            tx_type: TxType::Investment,
                            amount: plan.investment_amount,
                            status: TxStatus::Completed,
                            processed_by: None,
                            description: format!("Invested in {}", plan.name),
                            meta: EntryMeta::platform(),
                        },
                        now,
                    )
                    .await?;

                    let recipient =
                        bonus_recipient(!account.has_made_first_investment, account.referred_by);
                    let bonus = referral_bonus(plan.investment_amount);
                    let referral_bonus = match recipient {
                        Some(referrer_id) if bonus.is_positive() => {
                            ledger::adjust_balance(conn, referrer_id, bonus, now).await?;
                            let bonus_tx = ledger::record(
                                conn,
                                NewEntry {
                                    account_id: referrer_id,
                                    tx_type: TxType::ReferralBonus,
                                    amount: bonus,
                                    status: TxStatus::Completed,
                                    processed_by: None,
                                    description: format!(
                                        "Referral bonus (10%) for {} (account {}) investing {} PKR",
                                        account.name, account.id, plan.investment_amount
                                    ),
                                    meta: EntryMeta::platform(),
                                },
                                now,
                            )
                            .await?;
                            Some(ReferralPayout {
                                referrer_id,
                                amount: bonus,
                                transaction_id: bonus_tx,
                            })
                        }
                        _ => None,
                    };

                    Ok(InvestmentReceipt {
                        transaction_id,
                        plan_id: plan.id,
                        plan_name: plan.name,
                        amount: plan.investment_amount,
                        new_balance,
                        referral_bonus,
                    })
                })
            })
            .await?;

        info!(
            "Account {account_id} invested {} PKR in plan {} ({}); balance now {}",
            receipt.amount, receipt.plan_id, receipt.plan_name, receipt.new_balance
        );
        if let Some(payout) = &receipt.referral_bonus {
            info!(
                "Referral bonus {} PKR paid to account {} (entry {})",
                payout.amount, payout.referrer_id, payout.transaction_id
            );
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join;

    use super::*;
    use crate::plans::PlanUpdate;
    use crate::platform::testing::{file_fixture, fixture};

    #[tokio::test]
    async fn invest_debits_assigns_and_records() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;

        let receipt = f.platform.invest(a.id, plan.id).await.unwrap();
        assert_eq!(receipt.new_balance, Amount::from_pkr(500));
        assert_eq!(receipt.plan_name, "Silver");
        assert_eq!(receipt.referral_bonus, None);

        let a = f.account(a.id).await;
        assert_eq!(a.balance, Amount::from_pkr(500));
        assert_eq!(a.active_plan_id, Some(plan.id));
        assert!(a.has_made_first_investment);
        assert_eq!(a.last_check_in, Some(crate::platform::testing::start()));

        let history = f.platform.transaction_history(a.id).await.unwrap();
        let investment = &history[0];
        assert_eq!(investment.id, receipt.transaction_id);
        assert_eq!(investment.tx_type, TxType::Investment);
        assert_eq!(investment.status, TxStatus::Completed);
        assert_eq!(investment.amount, Amount::from_pkr(500));
        f.assert_ledger_balances().await;
    }

    #[tokio::test]
    async fn insufficient_funds_changes_nothing() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 499).await;
        let plan = f.plan("Silver", 500, 25).await;

        let err = f.platform.invest(a.id, plan.id).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                balance: Amount::from_pkr(499),
                required: Amount::from_pkr(500),
            }
        );
        let a = f.account(a.id).await;
        assert_eq!(a.balance, Amount::from_pkr(499));
        assert_eq!(a.active_plan_id, None);
        assert!(!a.has_made_first_investment);
        assert_eq!(f.platform.transaction_history(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_active_plan_per_account() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 2_000).await;
        let silver = f.plan("Silver", 500, 25).await;
        let gold = f.plan("Gold", 1_000, 60).await;

        f.platform.invest(a.id, silver.id).await.unwrap();
        let err = f.platform.invest(a.id, gold.id).await.unwrap_err();
        assert_eq!(err, LedgerError::AlreadyInvested { plan_id: silver.id });
        assert_eq!(f.account(a.id).await.balance, Amount::from_pkr(1_500));
    }

    #[tokio::test]
    async fn missing_and_withdrawn_plans_cannot_be_bought() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;
        f.platform
            .update_plan(
                plan.id,
                PlanUpdate {
                    is_active: Some(false),
                    ..PlanUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            f.platform.invest(a.id, plan.id).await.unwrap_err(),
            LedgerError::PlanInactive(plan.id)
        );
        assert_eq!(
            f.platform.invest(a.id, 999).await.unwrap_err(),
            LedgerError::PlanNotFound(999)
        );
    }

    #[tokio::test]
    async fn blocked_accounts_cannot_invest() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;
        f.platform
            .set_account_status(a.id, ledger_core::AccountStatus::Blocked)
            .await
            .unwrap();
        assert_eq!(
            f.platform.invest(a.id, plan.id).await.unwrap_err(),
            LedgerError::AccountBlocked(a.id)
        );
    }

    #[tokio::test]
    async fn first_investment_pays_the_referrer_once() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let b = f.signup("Bilal", Some(&a.referral_code)).await;
        f.fund(b.id, 2_000).await;
        let plan = f.plan("Silver", 500, 25).await;

        let receipt = f.platform.invest(b.id, plan.id).await.unwrap();
        let payout = receipt.referral_bonus.expect("bonus paid");
        assert_eq!(payout.referrer_id, a.id);
        assert_eq!(payout.amount, Amount::from_pkr(50));
        assert_eq!(f.account(a.id).await.balance, Amount::from_pkr(50));

        let referrer_history = f.platform.transaction_history(a.id).await.unwrap();
        assert_eq!(referrer_history.len(), 1);
        assert_eq!(referrer_history[0].tx_type, TxType::ReferralBonus);
        assert_eq!(referrer_history[0].amount, Amount::from_pkr(50));

        // Simulate the plan ending so a second purchase is possible.
        sqlx::query("UPDATE accounts SET active_plan_id = NULL WHERE id = ?1")
            .bind(b.id)
            .execute(f.platform.store.pool())
            .await
            .unwrap();
        let second = f.platform.invest(b.id, plan.id).await.unwrap();
        assert_eq!(second.referral_bonus, None);
        assert_eq!(f.account(a.id).await.balance, Amount::from_pkr(50));
        f.assert_ledger_balances().await;
    }

    #[tokio::test]
    async fn concurrent_investments_debit_once() {
        let dir = tempfile::tempdir().unwrap();
        let f = file_fixture(dir.path()).await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;

        let (first, second) = join(
            f.platform.invest(a.id, plan.id),
            f.platform.invest(a.id, plan.id),
        )
        .await;
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| matches!(
            r,
            Err(LedgerError::AlreadyInvested { .. })
        )));
        assert_eq!(f.account(a.id).await.balance, Amount::from_pkr(500));
        f.assert_ledger_balances().await;
    }
}
