//! Unrealized PnL evaluation.

use crate::risk::position::{Position, Side};
use crate::utils::decimal::safe_div;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Signed unrealized return of a position, as a leveraged percentage.
///
/// Long positions gain as price rises, shorts as it falls. A flat position,
/// or one with a zero entry price, evaluates to zero rather than erroring;
/// the control loop must keep ticking through degenerate snapshots.
pub fn unrealized_return_pct(position: &Position, current_price: Decimal) -> Decimal {
    let diff = match position.side {
        Side::Flat => return Decimal::ZERO,
        Side::Long => current_price - position.entry_price,
        Side::Short => position.entry_price - current_price,
    };

    safe_div(diff, position.entry_price) * position.leverage * dec!(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: Side, entry: Decimal, leverage: Decimal) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side,
            size: dec!(1),
            entry_price: entry,
            leverage,
        }
    }

    #[test]
    fn test_long_return_rises_with_price() {
        let pos = position(Side::Long, dec!(100), dec!(1));
        assert_eq!(unrealized_return_pct(&pos, dec!(112)), dec!(12));

        let mut last = unrealized_return_pct(&pos, dec!(90));
        for price in [dec!(95), dec!(100), dec!(105), dec!(120)] {
            let pct = unrealized_return_pct(&pos, price);
            assert!(pct > last);
            last = pct;
        }
    }

    #[test]
    fn test_short_return_falls_with_price() {
        let pos = position(Side::Short, dec!(50), dec!(2));
        // ((50 - 53) / 50) * 2 * 100 = -12
        assert_eq!(unrealized_return_pct(&pos, dec!(53)), dec!(-12));

        let mut last = unrealized_return_pct(&pos, dec!(45));
        for price in [dec!(48), dec!(50), dec!(52), dec!(55)] {
            let pct = unrealized_return_pct(&pos, price);
            assert!(pct < last);
            last = pct;
        }
    }

    #[test]
    fn test_leverage_scales_return() {
        let unlevered = position(Side::Long, dec!(200), dec!(1));
        let levered = position(Side::Long, dec!(200), dec!(5));
        assert_eq!(unrealized_return_pct(&unlevered, dec!(210)), dec!(5));
        assert_eq!(unrealized_return_pct(&levered, dec!(210)), dec!(25));
    }

    #[test]
    fn test_zero_entry_price_returns_zero() {
        let pos = position(Side::Long, Decimal::ZERO, dec!(1));
        assert_eq!(unrealized_return_pct(&pos, dec!(12345)), Decimal::ZERO);
        assert_eq!(unrealized_return_pct(&pos, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_flat_position_returns_zero() {
        let pos = Position::flat("BTCUSDT");
        assert_eq!(unrealized_return_pct(&pos, dec!(100)), Decimal::ZERO);
    }
}
