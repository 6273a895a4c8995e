//! Fixed-point monetary helpers. All persisted amounts are `Decimal` with 2
//! fractional digits (spec.md §6); gateway calls use integer minor units.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Rounds half-up to `places` fractional digits, matching spec.md's
/// `round_half_up` used throughout §4.D/§4.E/§4.G.
pub fn round_half_up(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// Gross = round(net * (1 + rate), 2) half-up.
pub fn net_to_gross(net: Decimal, vat_rate: Decimal) -> Decimal {
    round_half_up(net * (Decimal::ONE + vat_rate), 2)
}

/// VAT extracted from a gross amount: `gross * rate / (1 + rate)`, used when
/// the auction engine synthesizes an order from a winning bid amount (which
/// is itself gross).
pub fn vat_from_gross(gross: Decimal, vat_rate: Decimal) -> Decimal {
    round_half_up(gross * vat_rate / (Decimal::ONE + vat_rate), 2)
}

/// Integer minor units for a gateway call, e.g. halalas for SAR.
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * dec!(100)).round().to_i64().unwrap_or(i64::MAX)
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::from(minor) / dec!(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn net_to_gross_matches_scenario_3() {
        // spec.md scenario 3: price_net=1000, VAT 0.15 -> gross 1150.
        assert_eq!(net_to_gross(dec!(1000), dec!(0.15)), dec!(1150.00));
    }

    #[test]
    fn vat_from_gross_round_trips_for_clean_rates() {
        let gross = dec!(1150);
        let vat = vat_from_gross(gross, dec!(0.15));
        assert_eq!(vat, dec!(150.00));
    }

    #[rstest]
    #[case::midpoint_rounds_up(dec!(1.005), dec!(1.01))]
    #[case::midpoint_negative_rounds_away_from_zero(dec!(-1.005), dec!(-1.01))]
    #[case::already_exact_is_unchanged(dec!(2.50), dec!(2.50))]
    #[case::below_midpoint_rounds_down(dec!(1.004), dec!(1.00))]
    fn half_up_rounds_midpoint_away_from_zero(#[case] value: Decimal, #[case] expected: Decimal) {
        assert_eq!(round_half_up(value, 2), expected);
    }

    #[test]
    fn minor_units_round_trip() {
        let amount = dec!(1150.00);
        let minor = to_minor_units(amount);
        assert_eq!(minor, 115000);
        assert_eq!(from_minor_units(minor), amount);
    }
}
