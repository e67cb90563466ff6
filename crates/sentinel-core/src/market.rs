//! Per-symbol exchange constraints and market snapshots.

use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-symbol exchange constraints.
///
/// Immutable within a session; fetched from the exchange and cached.
/// A change in `tick_size` or `sz_decimals` between refreshes is a
/// material parameter change and must halt trading on the symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub symbol: String,
    /// Minimum price increment.
    #[serde(rename = "tickSize")]
    pub tick_size: Price,
    /// Size precision in fractional digits.
    #[serde(rename = "szDecimals")]
    pub sz_decimals: u8,
    #[serde(rename = "maxLeverage")]
    pub max_leverage: u32,
}

impl AssetMetadata {
    /// Round a price to this asset's tick size.
    #[must_use]
    pub fn round_price(&self, price: Price) -> Price {
        price.round_to_tick(self.tick_size)
    }

    /// Round a size to this asset's size precision.
    #[must_use]
    pub fn round_size(&self, size: Size) -> Size {
        size.round_to_decimals(self.sz_decimals)
    }

    /// The smallest size increment for this asset.
    #[must_use]
    pub fn size_step(&self) -> Size {
        Size::step(self.sz_decimals)
    }

    /// True if tick size or size precision differ from `other`.
    #[must_use]
    pub fn has_material_change(&self, other: &AssetMetadata) -> bool {
        self.tick_size != other.tick_size || self.sz_decimals != other.sz_decimals
    }
}

/// One symbol's market data row as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub price: Price,
    pub received_at: DateTime<Utc>,
}

/// Validation context for one symbol.
///
/// `realized_vol_pct` and `atr_pct` are percentages of price, supplied by
/// the analytics collaborators. Either may be absent; the validator falls
/// back to its base band when both are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolContext {
    pub mark_price: Price,
    #[serde(default)]
    pub realized_vol_pct: Option<Decimal>,
    #[serde(default)]
    pub atr_pct: Option<Decimal>,
}

/// Market snapshot the validator and bracket manager run against.
///
/// Built fresh each cycle from the exchange's market data; a missing
/// symbol means the context could not be fetched and validation fails
/// closed for intents on that symbol.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    symbols: HashMap<String, SymbolContext>,
}

impl MarketContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, ctx: SymbolContext) {
        self.symbols.insert(symbol.into(), ctx);
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&SymbolContext> {
        self.symbols.get(symbol)
    }

    /// Mark price for a symbol, if present and positive.
    ///
    /// Zero and negative marks are treated as absent: a context with a
    /// degenerate price must fail closed exactly like a missing one.
    #[must_use]
    pub fn mark_price(&self, symbol: &str) -> Option<Price> {
        self.symbols
            .get(symbol)
            .map(|c| c.mark_price)
            .filter(Price::is_positive)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn meta() -> AssetMetadata {
        AssetMetadata {
            symbol: "BTC".to_string(),
            tick_size: Price::new(dec!(0.5)),
            sz_decimals: 3,
            max_leverage: 50,
        }
    }

    #[test]
    fn test_rounding_through_metadata() {
        let m = meta();
        assert_eq!(m.round_price(Price::new(dec!(64123.3))).0, dec!(64123.5));
        assert_eq!(m.round_size(Size::new(dec!(0.12349))).0, dec!(0.123));
        assert_eq!(m.size_step().0, dec!(0.001));
    }

    #[test]
    fn test_material_change_detection() {
        let a = meta();
        let mut b = meta();
        assert!(!a.has_material_change(&b));

        b.max_leverage = 25; // leverage change is not material
        assert!(!a.has_material_change(&b));

        b.tick_size = Price::new(dec!(0.1));
        assert!(a.has_material_change(&b));
    }

    #[test]
    fn test_context_rejects_degenerate_mark() {
        let mut ctx = MarketContext::new();
        ctx.insert(
            "BTC",
            SymbolContext {
                mark_price: Price::ZERO,
                realized_vol_pct: None,
                atr_pct: None,
            },
        );
        assert!(ctx.mark_price("BTC").is_none());
        assert!(ctx.mark_price("ETH").is_none());
    }
}
