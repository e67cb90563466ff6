//! Cross-cycle and in-batch duplicate suppression.
//!
//! An entry intent is a duplicate when a materially identical order is
//! already resting on the exchange, or already accepted earlier in the
//! same batch. "Materially identical" is an exact match on a normalized
//! key: symbol, buy/sell side, and price/size rounded with the same
//! tick/step rounding the executor applies before submission, so
//! rounding can never produce a false mismatch between what we compare
//! and what we place.

use std::collections::HashSet;

use tracing::debug;

use sentinel_core::{
    AssetMetadata, IntentAction, OpenOrder, OrderSide, Price, Size,
};

use crate::validator::ValidatedIntent;

/// Normalized order identity used for duplicate detection.
///
/// Built with the same rounding the executor applies before
/// submission, so a key can never disagree with the order it stands
/// for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub symbol: String,
    pub is_buy: bool,
    pub price: Price,
    pub size: Size,
}

impl OrderKey {
    /// Build a key from raw values, rounding to the asset's constraints.
    #[must_use]
    pub fn new(
        symbol: &str,
        is_buy: bool,
        price: Price,
        size: Size,
        metadata: &AssetMetadata,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            is_buy,
            price: metadata.round_price(price),
            size: metadata.round_size(size),
        }
    }

    /// Key for a resting exchange order.
    #[must_use]
    pub fn from_open_order(order: &OpenOrder, metadata: &AssetMetadata) -> Self {
        Self::new(
            &order.symbol,
            order.side == OrderSide::Buy,
            order.price,
            order.size,
            metadata,
        )
    }

    /// Key for a validated entry intent.
    #[must_use]
    pub fn from_intent(intent: &ValidatedIntent, metadata: &AssetMetadata) -> Self {
        Self::new(
            &intent.symbol,
            intent.action == IntentAction::Buy,
            intent.price,
            intent.size,
            metadata,
        )
    }
}

/// Duplicate filter over one batch of validated entry intents.
///
/// Seeded with the exchange's current open orders (cross-cycle), then
/// consumed intent-by-intent (in-batch).
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<OrderKey>,
}

impl Deduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the filter with currently resting orders.
    ///
    /// Only non-reduce-only orders participate: protective orders have
    /// their own reconciliation and must not suppress entries.
    pub fn seed<'a>(
        &mut self,
        open_orders: impl IntoIterator<Item = &'a OpenOrder>,
        metadata_for: impl Fn(&str) -> Option<AssetMetadata>,
    ) {
        for order in open_orders {
            if order.reduce_only {
                continue;
            }
            if let Some(metadata) = metadata_for(&order.symbol) {
                self.seen.insert(OrderKey::from_open_order(order, &metadata));
            }
        }
    }

    /// Check one validated entry intent, recording it if fresh.
    ///
    /// Returns `true` when the intent is a duplicate of a resting order
    /// or of an earlier intent in this batch.
    pub fn is_duplicate(&mut self, intent: &ValidatedIntent, metadata: &AssetMetadata) -> bool {
        let key = OrderKey::from_intent(intent, metadata);
        let duplicate = !self.seen.insert(key);
        if duplicate {
            debug!(
                symbol = %intent.symbol,
                price = %intent.price,
                size = %intent.size,
                "Suppressing duplicate entry intent"
            );
        }
        duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::{OrderKind, PositionSide};

    fn metadata() -> AssetMetadata {
        AssetMetadata {
            symbol: "BTC".to_string(),
            tick_size: Price::new(dec!(0.5)),
            sz_decimals: 3,
            max_leverage: 50,
        }
    }

    fn intent(price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> ValidatedIntent {
        ValidatedIntent {
            action: IntentAction::Buy,
            symbol: "BTC".to_string(),
            side: Some(PositionSide::Long),
            size: Size::new(size),
            price: Price::new(price),
            leverage: 5,
            order_id: None,
        }
    }

    fn resting(price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> OpenOrder {
        OpenOrder {
            oid: 1,
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            price: Price::new(price),
            size: Size::new(size),
            reduce_only: false,
            kind: OrderKind::Limit,
        }
    }

    #[test]
    fn test_cross_cycle_duplicate_suppressed() {
        let mut dedup = Deduplicator::new();
        dedup.seed([&resting(dec!(64000), dec!(0.1))], |_| Some(metadata()));

        assert!(dedup.is_duplicate(&intent(dec!(64000), dec!(0.1)), &metadata()));
    }

    #[test]
    fn test_rounding_agreement_with_resting_order() {
        let mut dedup = Deduplicator::new();
        // Resting at 64000.0; intent at 64000.2 rounds to the same tick
        dedup.seed([&resting(dec!(64000.0), dec!(0.1))], |_| Some(metadata()));

        assert!(dedup.is_duplicate(&intent(dec!(64000.2), dec!(0.1001)), &metadata()));
    }

    #[test]
    fn test_in_batch_duplicate_suppressed() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.is_duplicate(&intent(dec!(64000), dec!(0.1)), &metadata()));
        assert!(dedup.is_duplicate(&intent(dec!(64000), dec!(0.1)), &metadata()));
    }

    #[test]
    fn test_different_price_not_duplicate() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.is_duplicate(&intent(dec!(64000), dec!(0.1)), &metadata()));
        assert!(!dedup.is_duplicate(&intent(dec!(64100), dec!(0.1)), &metadata()));
    }

    #[test]
    fn test_reduce_only_orders_do_not_seed() {
        let mut dedup = Deduplicator::new();
        let mut order = resting(dec!(64000), dec!(0.1));
        order.reduce_only = true;
        dedup.seed([&order], |_| Some(metadata()));

        assert!(!dedup.is_duplicate(&intent(dec!(64000), dec!(0.1)), &metadata()));
    }

    #[test]
    fn test_sides_tracked_separately() {
        let mut dedup = Deduplicator::new();
        let buy = intent(dec!(64000), dec!(0.1));
        let mut sell = buy.clone();
        sell.action = IntentAction::Sell;

        assert!(!dedup.is_duplicate(&buy, &metadata()));
        assert!(!dedup.is_duplicate(&sell, &metadata()));
    }
}
