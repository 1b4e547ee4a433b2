//! Spread application and deal arithmetic.
//!
//! Rates carry four decimals, amounts two; both truncate toward zero.
//! The client-buy side (client buys USDT) marks the rate up by the sell
//! spread; the client-sell side marks it down by the buy spread.

use crate::models::{DealSide, SpreadMode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const BPS_DIVISOR: Decimal = dec!(10000);

/// Apply the group spread to a raw mid, producing the quoted rate
/// (four-decimal truncation).
pub fn apply_spread(
    mid: Decimal,
    side: DealSide,
    mode: SpreadMode,
    sell_spread: Decimal,
    buy_spread: Decimal,
) -> Decimal {
    let rate = match (mode, side) {
        (SpreadMode::Bps, DealSide::ClientBuysUsdt) => {
            mid * (Decimal::ONE + sell_spread / BPS_DIVISOR)
        }
        (SpreadMode::Bps, DealSide::ClientSellsUsdt) => {
            mid * (Decimal::ONE - buy_spread / BPS_DIVISOR)
        }
        (SpreadMode::AbsBrl, DealSide::ClientBuysUsdt) => mid + sell_spread,
        (SpreadMode::AbsBrl, DealSide::ClientSellsUsdt) => mid - buy_spread,
        (SpreadMode::Flat, DealSide::ClientBuysUsdt) => sell_spread,
        (SpreadMode::Flat, DealSide::ClientSellsUsdt) => buy_spread,
    };
    rate.trunc_with_scale(4)
}

/// Declared inverse of `apply_spread`: recover the mid from a quoted rate.
/// Exact up to the four-decimal truncation of the forward direction.
pub fn invert_spread(
    quoted: Decimal,
    side: DealSide,
    mode: SpreadMode,
    sell_spread: Decimal,
    buy_spread: Decimal,
) -> Option<Decimal> {
    match (mode, side) {
        (SpreadMode::Bps, DealSide::ClientBuysUsdt) => {
            let factor = Decimal::ONE + sell_spread / BPS_DIVISOR;
            (factor != Decimal::ZERO).then(|| quoted / factor)
        }
        (SpreadMode::Bps, DealSide::ClientSellsUsdt) => {
            let factor = Decimal::ONE - buy_spread / BPS_DIVISOR;
            (factor != Decimal::ZERO).then(|| quoted / factor)
        }
        (SpreadMode::AbsBrl, DealSide::ClientBuysUsdt) => Some(quoted - sell_spread),
        (SpreadMode::AbsBrl, DealSide::ClientSellsUsdt) => Some(quoted + buy_spread),
        // Flat quotes carry no information about the mid.
        (SpreadMode::Flat, _) => None,
    }
}

/// BRL -> USDT at the given rate, two-decimal truncation.
pub fn usdt_from_brl(amount_brl: Decimal, rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    Some((amount_brl / rate).trunc_with_scale(2))
}

/// USDT -> BRL at the given rate, two-decimal truncation.
pub fn brl_from_usdt(amount_usdt: Decimal, rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    Some((amount_usdt * rate).trunc_with_scale(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_markup_matches_reference_quote() {
        // 5.20 mid with 50bps sell spread quotes 5.2260 to a buying client.
        let quoted = apply_spread(
            dec!(5.20),
            DealSide::ClientBuysUsdt,
            SpreadMode::Bps,
            dec!(50),
            dec!(0),
        );
        assert_eq!(quoted, dec!(5.2260));
    }

    #[test]
    fn bps_markdown_for_selling_client() {
        let quoted = apply_spread(
            dec!(5.20),
            DealSide::ClientSellsUsdt,
            SpreadMode::Bps,
            dec!(0),
            dec!(50),
        );
        assert_eq!(quoted, dec!(5.1740));
    }

    #[test]
    fn abs_brl_adds_and_subtracts() {
        let up = apply_spread(
            dec!(5.20),
            DealSide::ClientBuysUsdt,
            SpreadMode::AbsBrl,
            dec!(0.03),
            dec!(0.02),
        );
        assert_eq!(up, dec!(5.23));

        let down = apply_spread(
            dec!(5.20),
            DealSide::ClientSellsUsdt,
            SpreadMode::AbsBrl,
            dec!(0.03),
            dec!(0.02),
        );
        assert_eq!(down, dec!(5.18));
    }

    #[test]
    fn flat_mode_is_the_rate() {
        let quoted = apply_spread(
            dec!(5.20),
            DealSide::ClientBuysUsdt,
            SpreadMode::Flat,
            dec!(5.31),
            dec!(5.11),
        );
        assert_eq!(quoted, dec!(5.31));
    }

    #[test]
    fn spread_round_trip_recovers_mid() {
        for (mode, sell, buy) in [
            (SpreadMode::Bps, dec!(50), dec!(35)),
            (SpreadMode::Bps, dec!(-20), dec!(10)),
            (SpreadMode::AbsBrl, dec!(0.035), dec!(0.02)),
        ] {
            for side in [DealSide::ClientBuysUsdt, DealSide::ClientSellsUsdt] {
                let mid = dec!(5.2042);
                let quoted = apply_spread(mid, side, mode, sell, buy);
                let recovered = invert_spread(quoted, side, mode, sell, buy).unwrap();
                let diff = (recovered - mid).abs();
                // Forward truncation at 4dp bounds the inversion error.
                assert!(diff < dec!(0.0002), "{mode:?} {side:?}: diff {diff}");
            }
        }
    }

    #[test]
    fn deal_math_truncates_two_decimals() {
        // 4_479_100 BRL at 5.25 buys 853_161.90 USDT, truncated not rounded.
        assert_eq!(
            usdt_from_brl(dec!(4479100), dec!(5.25)),
            Some(dec!(853161.90))
        );
        // Back the other way the BRL total truncates to ...99.97.
        assert_eq!(
            brl_from_usdt(dec!(853161.90), dec!(5.25)),
            Some(dec!(4479099.97))
        );
    }

    #[test]
    fn lock_amounts_from_reference_scenario() {
        assert_eq!(
            usdt_from_brl(dec!(10000), dec!(5.2260)),
            Some(dec!(1913.50))
        );
    }

    #[test]
    fn conversion_rejects_nonpositive_rate() {
        assert_eq!(usdt_from_brl(dec!(100), dec!(0)), None);
        assert_eq!(brl_from_usdt(dec!(100), dec!(-1)), None);
    }
}
