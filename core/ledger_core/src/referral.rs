//! Referral bonus calculation.

use crate::types::{AccountId, Amount};

/// Bonus paid to the referrer, in basis points of the referee's first
/// investment (10%).
pub const REFERRAL_RATE_BPS: i64 = 1_000;

const BPS_DENOMINATOR: i128 = 10_000;

/// `investment × 10%`, rounded half-up to the nearest paisa.
pub fn referral_bonus(investment: Amount) -> Amount {
    let scaled = i128::from(investment.minor()) * i128::from(REFERRAL_RATE_BPS);
    let rounded = (scaled + BPS_DENOMINATOR / 2).div_euclid(BPS_DENOMINATOR);
    // The bonus never exceeds the investment, so it always fits back in i64.
    Amount::from_minor(rounded as i64)
}

/// The referrer owed a bonus, if any. Only an account's first investment
/// pays out.
pub fn bonus_recipient(
    was_first_investment: bool,
    referred_by: Option<AccountId>,
) -> Option<AccountId> {
    if was_first_investment {
        referred_by
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_of_whole_amounts() {
        assert_eq!(referral_bonus(Amount::from_pkr(500)), Amount::from_pkr(50));
        assert_eq!(referral_bonus(Amount::from_pkr(1_000)), Amount::from_pkr(100));
    }

    #[test]
    fn rounds_half_up_to_the_paisa() {
        // 10% of 0.05 = 0.005 → 0.01
        assert_eq!(referral_bonus(Amount::from_minor(5)), Amount::from_minor(1));
        // 10% of 0.04 = 0.004 → 0.00
        assert_eq!(referral_bonus(Amount::from_minor(4)), Amount::ZERO);
        // 10% of 123.45 = 12.345 → 12.35
        assert_eq!(
            referral_bonus(Amount::from_minor(12_345)),
            Amount::from_minor(1_235)
        );
    }

    #[test]
    fn only_first_investment_pays() {
        assert_eq!(bonus_recipient(true, Some(7)), Some(7));
        assert_eq!(bonus_recipient(false, Some(7)), None);
        assert_eq!(bonus_recipient(true, None), None);
    }
}
