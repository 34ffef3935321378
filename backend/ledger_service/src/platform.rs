//! The operation context shared by every engine.

use std::sync::Arc;

use ledger_core::{Amount, BusinessCalendar, Clock};

use crate::evidence::EvidenceStore;
use crate::store::Store;

/// Everything a ledger operation needs, injected once at startup.
#[derive(Clone)]
pub struct Platform {
    pub store: Store,
    pub clock: Arc<dyn Clock>,
    pub calendar: BusinessCalendar,
    pub evidence: Arc<dyn EvidenceStore>,
    pub min_withdrawal: Amount,
}

impl Platform {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        evidence: Arc<dyn EvidenceStore>,
        min_withdrawal: Amount,
    ) -> Self {
        Platform {
            store,
            clock,
            calendar,
            evidence,
            min_withdrawal,
        }
    }
}
