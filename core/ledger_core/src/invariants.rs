//! Ledger replay and the invariants it checks.
//!
//! - a balance equals the sum of its committed entries
//! - a balance is never negative
//! - request entries only move `Pending → Approved | Rejected`
//! - every stored entry is inside the type/status vocabulary

use serde::Serialize;

use crate::error::{LedgerError, Result};
use crate::types::{Account, AccountId, Amount, Transaction, TxStatus};

/// Outcome of replaying an account's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceAudit {
    pub account_id: AccountId,
    pub stored_balance: Amount,
    pub replayed_balance: Amount,
    pub entries: usize,
    pub consistent: bool,
}

/// Sum the balance effect of `entries`, rejecting out-of-vocabulary rows.
pub fn replay_balance(entries: &[Transaction]) -> Result<Amount> {
    entries.iter().try_fold(Amount::ZERO, |acc, entry| {
        entry.tx_type.validate_entry(entry.status)?;
        entry
            .balance_effect()
            .and_then(|effect| acc.checked_add(effect))
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!("replay overflow at entry {}", entry.id))
            })
    })
}

/// Compare the stored balance with its replayed ledger.
pub fn audit_account(account: &Account, entries: &[Transaction]) -> Result<BalanceAudit> {
    let own: Vec<Transaction> = entries
        .iter()
        .filter(|e| e.account_id == account.id)
        .cloned()
        .collect();
    let replayed = replay_balance(&own)?;
    Ok(BalanceAudit {
        account_id: account.id,
        stored_balance: account.balance,
        replayed_balance: replayed,
        entries: own.len(),
        consistent: replayed == account.balance && !account.balance.is_negative(),
    })
}

/// Balance/ledger agreement, panicking form for tests.
pub fn assert_balance_matches_ledger(account: &Account, entries: &[Transaction]) {
    let audit = audit_account(account, entries)
        .unwrap_or_else(|e| panic!("account {} has an unreadable ledger: {e}", account.id));
    assert!(
        !account.balance.is_negative(),
        "account {} has negative balance {}",
        account.id,
        account.balance
    );
    assert_eq!(
        audit.replayed_balance, audit.stored_balance,
        "account {} stores {} but its ledger sums to {}",
        account.id, audit.stored_balance, audit.replayed_balance
    );
}

/// Status transition check, panicking form for tests.
pub fn assert_valid_status_transition(from: TxStatus, to: TxStatus) {
    assert!(
        from.can_transition_to(to),
        "invalid status transition from {from:?} to {to:?}"
    );
}
