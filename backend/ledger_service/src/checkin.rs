//! Daily check-in: one payout of the active plan's daily return per
//! business day.

use chrono::{DateTime, Utc};
use ledger_core::checkin::{evaluate, CheckInState};
use ledger_core::{AccountId, Amount, EntryMeta, LedgerError, Result, TransactionId, TxStatus, TxType};
use serde::Serialize;
use tracing::{debug, info};

use crate::db;
use crate::ledger::{self, NewEntry};
use crate::plans::fetch_plan;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInStatus {
    #[serde(flatten)]
    pub state: CheckInState,
    pub last_check_in: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInReceipt {
    pub transaction_id: TransactionId,
    pub earned: Amount,
    pub new_balance: Amount,
    pub checked_in_at: DateTime<Utc>,
    pub next_eligible_at: DateTime<Utc>,
}

impl Platform {
    /// Whether `account_id` can claim today, without claiming.
    pub async fn check_in_status(&self, account_id: AccountId) -> Result<CheckInStatus> {
        let clock = self.clock.clone();
        let calendar = self.calendar;
        self.store
            .unit_of_work("check_in_status", move |conn| {
                let clock = clock.clone();
                Box::pin(async move {
                    let account = ledger::fetch_account(conn, account_id).await?;
                    let daily_return = match account.active_plan_id {
                        Some(plan_id) => Some(fetch_plan(conn, plan_id).await?.daily_return),
                        None => None,
                    };
                    Ok(CheckInStatus {
                        state: evaluate(daily_return, account.last_check_in, clock.now(), &calendar),
                        last_check_in: account.last_check_in,
                    })
                })
            })
            .await
    }

    /// Claim today's earnings.
    ///
    /// The account row is locked before the window is evaluated, so two
    /// concurrent claims for the same day credit exactly once.
    pub async fn check_in(&self, account_id: AccountId) -> Result<CheckInReceipt> {
        let clock = self.clock.clone();
        let calendar = self.calendar;

        let receipt = self
            .store
            .unit_of_work("check_in", move |conn| {
                let clock = clock.clone();
                Box::pin(async move {
                    let account = ledger::lock_account(conn, account_id).await?;
                    account.ensure_active()?;
                    let plan = match account.active_plan_id {
                        Some(plan_id) => fetch_plan(conn, plan_id).await?,
                        None => return Err(LedgerError::NoActivePlan),
                    };

                    let now = clock.now();
                    let earned = match evaluate(
                        Some(plan.daily_return),
                        account.last_check_in,
                        now,
                        &calendar,
                    ) {
                        CheckInState::Eligible { payout } => payout,
                        CheckInState::Claimed { next_eligible_at } => {
                            return Err(LedgerError::AlreadyClaimedToday { next_eligible_at })
                        }
                        CheckInState::NoActivePlan => return Err(LedgerError::NoActivePlan),
                    };

                    let new_balance = ledger::adjust_balance(conn, account.id, earned, now).await?;
                    sqlx::query("UPDATE accounts SET last_check_in = ?1 WHERE id = ?2")
                        .bind(db::to_millis(now))
                        .bind(account.id)
                        .execute(&mut *conn)
                        .await
                        .map_err(crate::errors::storage_error)?;

                    let transaction_id = ledger::record(
                        conn,
                        NewEntry {
                            account_id: account.id,
                            tx_type: TxType::DailyEarnings,
                            amount: earned,
                            status: TxStatus::Completed,
                            processed_by: None,
                            description: format!("Daily check-in earnings from {}", plan.name),
                            meta: EntryMeta::platform(),
                        },
                        now,
                    )
                    .await?;

                    Ok(CheckInReceipt {
                        transaction_id,
                        earned,
                        new_balance,
                        checked_in_at: now,
                        next_eligible_at: calendar.start_of_next_day(now),
                    })
                })
            })
            .await
            .inspect_err(|e| debug!("Check-in refused for account {account_id}: {e}"))?;

        info!(
            "Account {account_id} checked in for {} PKR; balance now {}",
            receipt.earned, receipt.new_balance
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use futures::future::join;

    use super::*;
    use crate::platform::testing::{file_fixture, fixture, start};

    #[tokio::test]
    async fn no_plan_means_no_check_in() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        let status = f.platform.check_in_status(a.id).await.unwrap();
        assert_eq!(status.state, CheckInState::NoActivePlan);
        assert_eq!(
            f.platform.check_in(a.id).await.unwrap_err(),
            LedgerError::NoActivePlan
        );
    }

    #[tokio::test]
    async fn investing_counts_as_todays_check_in() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;
        f.platform.invest(a.id, plan.id).await.unwrap();

        let tomorrow = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        assert_eq!(
            f.platform.check_in(a.id).await.unwrap_err(),
            LedgerError::AlreadyClaimedToday {
                next_eligible_at: tomorrow
            }
        );
        let status = f.platform.check_in_status(a.id).await.unwrap();
        assert_eq!(
            status.state,
            CheckInState::Claimed {
                next_eligible_at: tomorrow
            }
        );
        assert_eq!(status.last_check_in, Some(start()));
    }

    #[tokio::test]
    async fn next_day_pays_the_daily_return_once() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;
        f.platform.invest(a.id, plan.id).await.unwrap();

        // 00:30 the next day: a new business day, well under 24h later.
        f.clock
            .set(Utc.with_ymd_and_hms(2024, 3, 11, 0, 30, 0).unwrap());
        let status = f.platform.check_in_status(a.id).await.unwrap();
        assert_eq!(
            status.state,
            CheckInState::Eligible {
                payout: Amount::from_pkr(25)
            }
        );

        let receipt = f.platform.check_in(a.id).await.unwrap();
        assert_eq!(receipt.earned, Amount::from_pkr(25));
        assert_eq!(receipt.new_balance, Amount::from_pkr(525));
        assert_eq!(
            receipt.next_eligible_at,
            Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap()
        );

        f.clock.advance(Duration::hours(23));
        assert!(matches!(
            f.platform.check_in(a.id).await,
            Err(LedgerError::AlreadyClaimedToday { .. })
        ));

        let history = f.platform.transaction_history(a.id).await.unwrap();
        assert_eq!(history[0].tx_type, TxType::DailyEarnings);
        assert_eq!(history[0].id, receipt.transaction_id);
        assert_eq!(f.account(a.id).await.last_check_in, Some(receipt.checked_in_at));
        f.assert_ledger_balances().await;
    }

    #[tokio::test]
    async fn blocked_accounts_cannot_check_in() {
        let f = fixture().await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;
        f.platform.invest(a.id, plan.id).await.unwrap();
        f.platform
            .set_account_status(a.id, ledger_core::AccountStatus::Blocked)
            .await
            .unwrap();
        f.clock.advance(Duration::days(1));
        assert_eq!(
            f.platform.check_in(a.id).await.unwrap_err(),
            LedgerError::AccountBlocked(a.id)
        );
    }

    #[tokio::test]
    async fn concurrent_check_ins_credit_once() {
        let dir = tempfile::tempdir().unwrap();
        let f = file_fixture(dir.path()).await;
        let a = f.signup("Ayesha", None).await;
        f.fund(a.id, 1_000).await;
        let plan = f.plan("Silver", 500, 25).await;
        f.platform.invest(a.id, plan.id).await.unwrap();
        f.clock.advance(Duration::days(1));

        let (first, second) = join(f.platform.check_in(a.id), f.platform.check_in(a.id)).await;
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(LedgerError::AlreadyClaimedToday { .. }))));
        assert_eq!(f.account(a.id).await.balance, Amount::from_pkr(525));
        f.assert_ledger_balances().await;
    }
}
