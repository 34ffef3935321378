//! # Types
//!
//! Typed records shared by every layer of the ledger.
//!
//! ## Entry vocabulary
//!
//! A ledger entry is a `(TxType, TxStatus)` pair. Only these combinations
//! exist:
//!
//! | Type                                   | Allowed statuses               |
//! |----------------------------------------|--------------------------------|
//! | `Deposit`, `Withdrawal`                | `Pending`, `Approved`, `Rejected` |
//! | `Investment`, `DailyEarnings`, `ReferralBonus`, `AdminAdjustment` | `Completed` |
//!
//! ## Request lifecycle
//!
//! ```text
//! Pending ──► Approved
//!    └─────► Rejected
//! ```
//!
//! Both branches are terminal. `Completed` entries are written once and
//! never transition.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

pub type AccountId = i64;
pub type PlanId = i64;
pub type TransactionId = i64;
pub type AdminId = i64;

/// Minor units (paisa) per PKR.
pub const MINOR_PER_UNIT: i64 = 100;

// ─────────────────────────────────────────────────────────
// Amount
// ─────────────────────────────────────────────────────────

/// A currency amount in minor units.
///
/// Serialized as a decimal string (`"500.00"`). Deserializes from a decimal
/// string or a whole-PKR integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "AmountRepr", into = "String")]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    /// Whole PKR. Only for literals; user input goes through [`FromStr`].
    pub const fn from_pkr(pkr: i64) -> Self {
        Amount(pkr * MINOR_PER_UNIT)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_neg(self) -> Option<Amount> {
        self.0.checked_neg().map(Amount)
    }

    /// Reject zero and negative amounts.
    pub fn require_positive(self, what: &str) -> Result<Amount> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(LedgerError::InvalidAmount(format!("{what} must be positive")))
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = MINOR_PER_UNIT as u64;
        write!(f, "{sign}{}.{:02}", abs / unit, abs % unit)
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    /// Parse `"500"`, `"500.5"` or `"500.50"`. At most two decimals; no sign.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LedgerError::InvalidAmount(format!("'{s}' is not a valid amount"));
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || frac.len() > 2
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac_minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        whole
            .checked_mul(MINOR_PER_UNIT)
            .and_then(|m| m.checked_add(frac_minor))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Text(String),
    WholeUnits(i64),
}

impl TryFrom<AmountRepr> for Amount {
    type Error = LedgerError;

    fn try_from(repr: AmountRepr) -> Result<Self> {
        match repr {
            AmountRepr::Text(s) => s.parse(),
            AmountRepr::WholeUnits(pkr) => pkr
                .checked_mul(MINOR_PER_UNIT)
                .filter(|m| *m >= 0)
                .map(Amount)
                .ok_or_else(|| LedgerError::InvalidAmount(format!("{pkr} is out of range"))),
        }
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> String {
        amount.to_string()
    }
}

// ─────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Blocked => "Blocked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Active" => Ok(Self::Active),
            "Blocked" => Ok(Self::Blocked),
            other => Err(LedgerError::Validation(format!(
                "unknown account status '{other}'"
            ))),
        }
    }
}

/// A registered platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub balance: Amount,
    pub status: AccountStatus,
    pub referral_code: String,
    /// Weak back-reference; blocking the referrer never touches referees.
    pub referred_by: Option<AccountId>,
    /// Flips false→true exactly once, on the first investment.
    pub has_made_first_investment: bool,
    pub active_plan_id: Option<PlanId>,
    pub last_check_in: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn ensure_active(&self) -> Result<()> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Blocked => Err(LedgerError::AccountBlocked(self.id)),
        }
    }

    pub fn ensure_covers(&self, required: Amount) -> Result<()> {
        if self.balance >= required {
            Ok(())
        } else {
            Err(LedgerError::InsufficientFunds {
                balance: self.balance,
                required,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────
// Plans
// ─────────────────────────────────────────────────────────

/// An investment product. Shared by every account holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub investment_amount: Amount,
    pub daily_return: Amount,
    /// Advisory only; holdings do not expire.
    pub duration_days: u32,
    pub description: Option<String>,
    pub is_active: bool,
}

impl Plan {
    /// Field rules applied on create and on every edit.
    pub fn validate_terms(
        name: &str,
        investment_amount: Amount,
        daily_return: Amount,
        duration_days: i64,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(LedgerError::Validation("plan name is required".into()));
        }
        investment_amount.require_positive("investment amount")?;
        if daily_return.is_negative() {
            return Err(LedgerError::InvalidAmount(
                "daily return cannot be negative".into(),
            ));
        }
        if duration_days <= 0 || duration_days > i64::from(u32::MAX) {
            return Err(LedgerError::Validation(
                "duration must be a positive number of days".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Ledger entries
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Deposit,
    Withdrawal,
    Investment,
    DailyEarnings,
    ReferralBonus,
    AdminAdjustment,
}

/// Which way an entry moves its owner's balance once committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

impl TxType {
    pub const ALL: [TxType; 6] = [
        TxType::Deposit,
        TxType::Withdrawal,
        TxType::Investment,
        TxType::DailyEarnings,
        TxType::ReferralBonus,
        TxType::AdminAdjustment,
    ];

    /// Storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "Deposit",
            Self::Withdrawal => "Withdrawal",
            Self::Investment => "Investment",
            Self::DailyEarnings => "Daily Earnings",
            Self::ReferralBonus => "Referral Bonus",
            Self::AdminAdjustment => "Admin Adjustment",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidType(s.to_string()))
    }

    /// Admin adjustments are credits; debits only happen through
    /// withdrawals and investments.
    pub fn direction(&self) -> Direction {
        match self {
            Self::Withdrawal | Self::Investment => Direction::Debit,
            Self::Deposit | Self::DailyEarnings | Self::ReferralBonus | Self::AdminAdjustment => {
                Direction::Credit
            }
        }
    }

    /// Deposits and withdrawals go through admin approval.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Deposit | Self::Withdrawal)
    }

    pub fn allows(&self, status: TxStatus) -> bool {
        if self.is_request() {
            matches!(
                status,
                TxStatus::Pending | TxStatus::Approved | TxStatus::Rejected
            )
        } else {
            status == TxStatus::Completed
        }
    }

    /// Reject combinations outside the vocabulary.
    pub fn validate_entry(&self, status: TxStatus) -> Result<()> {
        if self.allows(status) {
            Ok(())
        } else {
            Err(LedgerError::InvalidStatus {
                tx_type: *self,
                status,
            })
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Completed => "Completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            "Completed" => Ok(Self::Completed),
            other => Err(LedgerError::Validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }

    /// The only transition: `Pending` to one of the two terminal outcomes.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Approved) | (TxStatus::Pending, TxStatus::Rejected)
        )
    }

    /// Whether an entry in this status has moved its owner's balance.
    pub fn is_committed(&self) -> bool {
        matches!(self, TxStatus::Approved | TxStatus::Completed)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional payment details attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Payment channel (e.g. `Easypaisa`, `JazzCash`, `Platform`).
    pub method: Option<String>,
    /// User-supplied payment proof id.
    pub external_reference: Option<String>,
    /// Reference returned by evidence storage.
    pub evidence_ref: Option<String>,
    /// Withdrawal destination account number.
    pub destination: Option<String>,
}

impl EntryMeta {
    pub fn platform() -> Self {
        EntryMeta {
            method: Some("Platform".to_string()),
            ..EntryMeta::default()
        }
    }
}

/// One ledger entry as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub tx_type: TxType,
    /// Positive magnitude; [`TxType::direction`] gives the sign.
    pub amount: Amount,
    pub status: TxStatus,
    pub description: String,
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub created_at: DateTime<Utc>,
    pub processed_by: Option<AdminId>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Signed balance effect, or zero while pending / after rejection.
    pub fn balance_effect(&self) -> Option<Amount> {
        if !self.status.is_committed() {
            return Some(Amount::ZERO);
        }
        match self.tx_type.direction() {
            Direction::Credit => Some(self.amount),
            Direction::Debit => self.amount.checked_neg(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parses_decimal_strings() {
        assert_eq!("500".parse::<Amount>().unwrap(), Amount::from_pkr(500));
        assert_eq!("500.5".parse::<Amount>().unwrap(), Amount::from_minor(50_050));
        assert_eq!("0.05".parse::<Amount>().unwrap(), Amount::from_minor(5));
        assert_eq!(" 12.34 ".parse::<Amount>().unwrap(), Amount::from_minor(1_234));
    }

    #[test]
    fn amount_rejects_malformed_input() {
        for bad in ["", ".5", "-10", "1.234", "1e3", "abc", "99999999999999999999"] {
            assert!(bad.parse::<Amount>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn amount_display_keeps_two_decimals() {
        assert_eq!(Amount::from_minor(52_500).to_string(), "525.00");
        assert_eq!(Amount::from_minor(7).to_string(), "0.07");
        assert_eq!(Amount::from_minor(-250).to_string(), "-2.50");
    }

    #[test]
    fn amount_serde_accepts_string_and_integer() {
        let a: Amount = serde_json::from_str("\"25.50\"").unwrap();
        assert_eq!(a, Amount::from_minor(2_550));
        let b: Amount = serde_json::from_str("100").unwrap();
        assert_eq!(b, Amount::from_pkr(100));
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"25.50\"");
        assert!(serde_json::from_str::<Amount>("-5").is_err());
    }

    #[test]
    fn vocabulary_matrix() {
        for t in [TxType::Deposit, TxType::Withdrawal] {
            assert!(t.allows(TxStatus::Pending));
            assert!(t.allows(TxStatus::Approved));
            assert!(t.allows(TxStatus::Rejected));
            assert!(!t.allows(TxStatus::Completed));
        }
        for t in [
            TxType::Investment,
            TxType::DailyEarnings,
            TxType::ReferralBonus,
            TxType::AdminAdjustment,
        ] {
            assert!(t.allows(TxStatus::Completed));
            assert!(!t.allows(TxStatus::Pending));
            assert!(matches!(
                t.validate_entry(TxStatus::Approved),
                Err(LedgerError::InvalidStatus { .. })
            ));
        }
    }

    #[test]
    fn tx_type_round_trips_storage_names() {
        for t in TxType::ALL {
            assert_eq!(TxType::parse(t.as_str()).unwrap(), t);
        }
        assert!(matches!(
            TxType::parse("Bonus"),
            Err(LedgerError::InvalidType(_))
        ));
    }

    #[test]
    fn only_pending_transitions() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Approved));
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Rejected));
        assert!(!TxStatus::Approved.can_transition_to(TxStatus::Rejected));
        assert!(!TxStatus::Rejected.can_transition_to(TxStatus::Approved));
        assert!(!TxStatus::Pending.can_transition_to(TxStatus::Completed));
        assert!(!TxStatus::Completed.can_transition_to(TxStatus::Approved));
    }

    #[test]
    fn plan_terms_validation() {
        assert!(Plan::validate_terms("Gold", Amount::from_pkr(500), Amount::ZERO, 30).is_ok());
        assert!(Plan::validate_terms(" ", Amount::from_pkr(500), Amount::ZERO, 30).is_err());
        assert!(Plan::validate_terms("Gold", Amount::ZERO, Amount::ZERO, 30).is_err());
        assert!(
            Plan::validate_terms("Gold", Amount::from_pkr(1), Amount::from_minor(-1), 30).is_err()
        );
        assert!(Plan::validate_terms("Gold", Amount::from_pkr(1), Amount::ZERO, 0).is_err());
    }
}
