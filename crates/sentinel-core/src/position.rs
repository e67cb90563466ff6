//! Exchange-reported open exposure.

use crate::{PositionSide, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One open position as reported by the exchange.
///
/// The sign of `size` encodes the side: positive is long, negative is
/// short. The exchange owns this data; the engine reads it fresh each
/// cycle and never treats a cached copy as ground truth for
/// correctness-critical decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed size; sign encodes the side.
    pub size: Decimal,
    pub entry_price: Price,
    pub mark_price: Price,
    /// Absent for cross-margin positions with no liquidation level yet.
    #[serde(default)]
    pub liquidation_price: Option<Price>,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Side of the exposure, or `None` when flat.
    #[must_use]
    pub fn side(&self) -> Option<PositionSide> {
        if self.size.is_zero() {
            None
        } else if self.size.is_sign_positive() {
            Some(PositionSide::Long)
        } else {
            Some(PositionSide::Short)
        }
    }

    /// Unsigned position size.
    #[must_use]
    pub fn abs_size(&self) -> Size {
        Size::new(self.size.abs())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }

    /// Whether the position is currently in profit at its mark price.
    ///
    /// A stop-loss may only trail while this holds.
    #[must_use]
    pub fn is_profitable(&self) -> bool {
        match self.side() {
            Some(PositionSide::Long) => self.mark_price > self.entry_price,
            Some(PositionSide::Short) => self.mark_price < self.entry_price,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long(mark: Decimal) -> Position {
        Position {
            symbol: "BTC".to_string(),
            size: dec!(0.5),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(mark),
            liquidation_price: Some(Price::new(dec!(54000))),
            leverage: 10,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_side_from_sign() {
        assert_eq!(long(dec!(60000)).side(), Some(PositionSide::Long));

        let mut short = long(dec!(60000));
        short.size = dec!(-0.5);
        assert_eq!(short.side(), Some(PositionSide::Short));
        assert_eq!(short.abs_size().0, dec!(0.5));

        let mut flat = long(dec!(60000));
        flat.size = Decimal::ZERO;
        assert_eq!(flat.side(), None);
        assert!(!flat.is_open());
    }

    #[test]
    fn test_profitability() {
        assert!(long(dec!(61000)).is_profitable());
        assert!(!long(dec!(59000)).is_profitable());
        assert!(!long(dec!(60000)).is_profitable());
    }
}
