//! Canonical position snapshot.
//!
//! The gateway reports a signed quantity; the risk core works with a side
//! plus an unsigned magnitude. Snapshots are rebuilt from the gateway on
//! every poll and never cached: fills, manual intervention, or partial
//! closes can change the exchange-side position between ticks.

use crate::exchange::RawPosition;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Flat,
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Flat => write!(f, "flat"),
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Canonical position entity.
///
/// Invariant: `side == Flat` exactly when `size` is zero; `entry_price` is
/// meaningless when flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Unsigned magnitude of open contracts.
    pub size: Decimal,
    /// Average entry price, fixed at position open.
    pub entry_price: Decimal,
    /// Return multiplier; 1 when the venue reports none.
    pub leverage: Decimal,
}

impl Position {
    /// A flat position for the symbol.
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::Flat,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage: Decimal::ONE,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == Side::Flat
    }
}

/// Convert a raw exchange record into the canonical form.
///
/// Total over its input: an absent record, or one with zero signed size,
/// maps to a flat position rather than an error, so a momentarily missing
/// record can never crash the control loop.
pub fn normalize(symbol: &str, raw: Option<RawPosition>) -> Position {
    let raw = match raw {
        Some(r) if r.position_amt != Decimal::ZERO => r,
        _ => return Position::flat(symbol),
    };

    let side = if raw.position_amt > Decimal::ZERO {
        Side::Long
    } else {
        Side::Short
    };

    Position {
        symbol: raw.symbol,
        side,
        size: raw.position_amt.abs(),
        entry_price: raw.entry_price,
        leverage: raw.leverage.unwrap_or(Decimal::ONE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(amt: Decimal, entry: Decimal, leverage: Option<Decimal>) -> RawPosition {
        RawPosition {
            symbol: "BTCUSDT".to_string(),
            position_amt: amt,
            entry_price: entry,
            mark_price: dec!(50000),
            leverage,
            notional: amt * dec!(50000),
        }
    }

    #[test]
    fn test_absent_record_is_flat() {
        let pos = normalize("BTCUSDT", None);
        assert_eq!(pos.side, Side::Flat);
        assert_eq!(pos.size, Decimal::ZERO);
    }

    #[test]
    fn test_zero_size_record_is_flat() {
        // Venues report a placeholder record with a stale entry price after
        // a position closes; it must normalize to flat without error.
        let pos = normalize("BTCUSDT", Some(raw(Decimal::ZERO, dec!(48000), None)));
        assert_eq!(pos.side, Side::Flat);
        assert_eq!(pos.size, Decimal::ZERO);
    }

    #[test]
    fn test_positive_size_is_long() {
        let pos = normalize("BTCUSDT", Some(raw(dec!(0.5), dec!(48000), Some(dec!(3)))));
        assert_eq!(pos.side, Side::Long);
        assert_eq!(pos.size, dec!(0.5));
        assert_eq!(pos.entry_price, dec!(48000));
        assert_eq!(pos.leverage, dec!(3));
    }

    #[test]
    fn test_negative_size_is_short_with_unsigned_magnitude() {
        let pos = normalize("BTCUSDT", Some(raw(dec!(-2), dec!(51000), None)));
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.size, dec!(2));
        assert_eq!(pos.leverage, Decimal::ONE);
    }
}
