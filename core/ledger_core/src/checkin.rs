//! # Daily check-in window
//!
//! Eligibility is decided by calendar day, not elapsed hours:
//!
//! ```text
//! NoActivePlan                      (until an investment is made)
//! Eligible   last_check_in is None or before today's midnight
//! Claimed    last_check_in falls within today
//! ```
//!
//! "Today" is the business calendar day at a fixed UTC offset. There is no
//! per-account timezone; a user far from the server's offset sees the
//! window roll over at the server's midnight.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveTime, Offset, TimeZone, Utc};
use serde::Serialize;

use crate::types::Amount;

/// Source of "now". Injected so day rollover can be simulated.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Where calendar days begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl BusinessCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        BusinessCalendar { offset }
    }

    pub fn utc() -> Self {
        BusinessCalendar::new(Utc.fix())
    }

    /// The server's current local offset, frozen at construction.
    pub fn server_local() -> Self {
        BusinessCalendar::new(*Local::now().offset())
    }

    /// `None` when the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(BusinessCalendar::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Midnight (in this calendar) of the day containing `instant`.
    pub fn start_of_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let local_midnight = instant
            .with_timezone(&self.offset)
            .date_naive()
            .and_time(NaiveTime::MIN);
        let utc_naive =
            local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc_naive)
    }

    pub fn start_of_next_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_day(instant) + Duration::days(1)
    }

    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.start_of_day(a) == self.start_of_day(b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckInState {
    NoActivePlan,
    Eligible { payout: Amount },
    Claimed { next_eligible_at: DateTime<Utc> },
}

/// Evaluate the check-in window for an account.
///
/// `daily_return` is the active plan's payout, or `None` without a plan.
pub fn evaluate(
    daily_return: Option<Amount>,
    last_check_in: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    calendar: &BusinessCalendar,
) -> CheckInState {
    let Some(payout) = daily_return else {
        return CheckInState::NoActivePlan;
    };
    match last_check_in {
        Some(last) if last >= calendar.start_of_day(now) => CheckInState::Claimed {
            next_eligible_at: calendar.start_of_next_day(now),
        },
        _ => CheckInState::Eligible { payout },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn utc_day_boundaries() {
        let cal = BusinessCalendar::utc();
        let now = at("2024-03-10T15:30:00Z");
        assert_eq!(cal.start_of_day(now), at("2024-03-10T00:00:00Z"));
        assert_eq!(cal.start_of_next_day(now), at("2024-03-11T00:00:00Z"));
    }

    #[test]
    fn offset_day_boundaries() {
        // Pakistan Standard Time, UTC+5.
        let cal = BusinessCalendar::from_offset_minutes(300).unwrap();
        // 20:00 UTC on the 10th is already 01:00 on the 11th in PKT.
        let now = at("2024-03-10T20:00:00Z");
        assert_eq!(cal.start_of_day(now), at("2024-03-10T19:00:00Z"));
        assert_eq!(cal.start_of_next_day(now), at("2024-03-11T19:00:00Z"));
        assert!(cal.same_day(at("2024-03-10T19:00:00Z"), at("2024-03-11T18:59:59Z")));
        assert!(!cal.same_day(at("2024-03-10T18:59:59Z"), at("2024-03-10T19:00:00Z")));
    }

    #[test]
    fn rejects_absurd_offsets() {
        assert!(BusinessCalendar::from_offset_minutes(24 * 60).is_none());
        assert!(BusinessCalendar::from_offset_minutes(-300).is_some());
    }

    #[test]
    fn no_plan_means_no_check_in() {
        let cal = BusinessCalendar::utc();
        let state = evaluate(None, None, at("2024-03-10T10:00:00Z"), &cal);
        assert_eq!(state, CheckInState::NoActivePlan);
    }

    #[test]
    fn eligible_when_never_checked_in_or_on_a_previous_day() {
        let cal = BusinessCalendar::utc();
        let payout = Amount::from_pkr(25);
        let now = at("2024-03-10T00:00:00Z");
        assert_eq!(
            evaluate(Some(payout), None, now, &cal),
            CheckInState::Eligible { payout }
        );
        // One second before midnight counts as yesterday.
        assert_eq!(
            evaluate(Some(payout), Some(at("2024-03-09T23:59:59Z")), now, &cal),
            CheckInState::Eligible { payout }
        );
    }

    #[test]
    fn claimed_until_next_midnight() {
        let cal = BusinessCalendar::utc();
        let payout = Amount::from_pkr(25);
        let state = evaluate(
            Some(payout),
            Some(at("2024-03-10T00:00:01Z")),
            at("2024-03-10T23:59:59Z"),
            &cal,
        );
        assert_eq!(
            state,
            CheckInState::Claimed {
                next_eligible_at: at("2024-03-11T00:00:00Z")
            }
        );
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(at("2024-03-10T08:00:00Z"));
        assert_eq!(clock.now(), at("2024-03-10T08:00:00Z"));
        clock.advance(Duration::days(1));
        assert_eq!(clock.now(), at("2024-03-11T08:00:00Z"));
        clock.set(at("2025-01-01T00:00:00Z"));
        assert_eq!(clock.now(), at("2025-01-01T00:00:00Z"));
    }
}
