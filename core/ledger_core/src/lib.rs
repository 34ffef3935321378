//! # Ledger Core
//!
//! Pure domain rules of the investment / referral ledger. Nothing in this
//! crate performs I/O; the service crate owns storage and wires these rules
//! into units of work.
//!
//! | Concern               | Module            |
//! |-----------------------|-------------------|
//! | Typed records, money  | [`types`]         |
//! | Entry vocabulary      | [`types::TxType`], [`types::TxStatus`] |
//! | Referral bonus        | [`referral`]      |
//! | Daily check-in window | [`checkin`]       |
//! | Failure taxonomy      | [`error`]         |
//! | Ledger replay / audit | [`invariants`]    |
//!
//! ## Money
//!
//! The platform is single-currency (PKR). Every amount is an [`Amount`] in
//! minor units (paisa), so balances never accumulate floating point drift.

pub mod checkin;
pub mod error;
pub mod invariants;
pub mod referral;
pub mod types;

pub use checkin::{BusinessCalendar, CheckInState, Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, LedgerError, Result};
pub use referral::{referral_bonus, REFERRAL_RATE_BPS};
pub use types::{
    Account, AccountId, AccountStatus, AdminId, Amount, Direction, EntryMeta, Plan, PlanId,
    Transaction, TransactionId, TxStatus, TxType,
};
