//! Failure taxonomy for every ledger operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{AccountId, Amount, PlanId, TransactionId, TxStatus, TxType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("investment plan {0} not found")]
    PlanNotFound(PlanId),

    #[error("investment plan {0} is not available for purchase")]
    PlanInactive(PlanId),

    #[error("no pending {kind} with id {id}")]
    TransactionNotFound { id: TransactionId, kind: TxType },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Amount, required: Amount },

    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    #[error("withdrawal requires at least one referred account that has invested")]
    ReferralRequirementNotMet,

    #[error("account already holds active plan {plan_id}")]
    AlreadyInvested { plan_id: PlanId },

    #[error("account has no active plan")]
    NoActivePlan,

    #[error("daily earnings already claimed; next check-in at {next_eligible_at}")]
    AlreadyClaimedToday { next_eligible_at: DateTime<Utc> },

    #[error("account {0} is blocked")]
    AccountBlocked(AccountId),

    #[error("unknown transaction type '{0}'")]
    InvalidType(String),

    #[error("status {status} is not allowed for {tx_type} entries")]
    InvalidStatus { tx_type: TxType, status: TxStatus },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("payment evidence is required")]
    EvidenceRequired,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage conflict: {0}")]
    StorageConflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Stable failure categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientFunds,
    BelowMinimum,
    ReferralRequirementNotMet,
    AlreadyInvested,
    PlanInactive,
    AccountBlocked,
    Validation,
    StorageConflict,
    StorageUnavailable,
}

impl ErrorKind {
    /// Same spelling as the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::InsufficientFunds => "insufficient_funds",
            Self::BelowMinimum => "below_minimum",
            Self::ReferralRequirementNotMet => "referral_requirement_not_met",
            Self::AlreadyInvested => "already_invested",
            Self::PlanInactive => "plan_inactive",
            Self::AccountBlocked => "account_blocked",
            Self::Validation => "validation",
            Self::StorageConflict => "storage_conflict",
            Self::StorageUnavailable => "storage_unavailable",
        }
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) | Self::PlanNotFound(_) | Self::TransactionNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::InvalidState(_) | Self::NoActivePlan | Self::AlreadyClaimedToday { .. } => {
                ErrorKind::InvalidState
            }
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::BelowMinimum { .. } => ErrorKind::BelowMinimum,
            Self::ReferralRequirementNotMet => ErrorKind::ReferralRequirementNotMet,
            Self::AlreadyInvested { .. } => ErrorKind::AlreadyInvested,
            Self::PlanInactive(_) => ErrorKind::PlanInactive,
            Self::AccountBlocked(_) => ErrorKind::AccountBlocked,
            Self::InvalidType(_)
            | Self::InvalidStatus { .. }
            | Self::InvalidAmount(_)
            | Self::EvidenceRequired
            | Self::Validation(_) => ErrorKind::Validation,
            Self::StorageConflict(_) => ErrorKind::StorageConflict,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Only lock / timeout failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageConflict(_))
    }

    /// Fixed end-user wording. Never contains storage diagnostics.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "Account not found.",
            Self::PlanNotFound(_) => "Investment plan not found.",
            Self::PlanInactive(_) => "This investment plan is not available.",
            Self::TransactionNotFound { .. } => "Pending request not found or already processed.",
            Self::InvalidState(_) => "This action is not allowed in the current state.",
            Self::InsufficientFunds { .. } => "Insufficient balance.",
            Self::BelowMinimum { .. } => "Amount is below the minimum allowed.",
            Self::ReferralRequirementNotMet => {
                "Withdrawal requirement not met: you need at least one referred user who has made an investment."
            }
            Self::AlreadyInvested { .. } => "You already have an active investment plan.",
            Self::NoActivePlan => "You need an active investment plan to perform daily check-ins.",
            Self::AlreadyClaimedToday { .. } => "You have already claimed your earnings for today.",
            Self::AccountBlocked(_) => "Your account has been blocked. Please contact support.",
            Self::InvalidType(_) | Self::InvalidStatus { .. } => "Invalid transaction.",
            Self::InvalidAmount(_) => "Invalid amount.",
            Self::EvidenceRequired => "Payment screenshot is required.",
            Self::Validation(_) => "Invalid request.",
            Self::StorageConflict(_) => "The service is busy. Please try again.",
            Self::StorageUnavailable(_) => "Server error. Please try again later.",
        }
    }
}
