//! Scaled-entry ladder planning.
//!
//! A scaled order rests a ladder of limit orders evenly spaced between
//! `price_low` and `price_high`, splitting the total size across the
//! levels.

use rust_decimal::Decimal;

use sentinel_core::{AssetMetadata, Price, Size};

/// Evenly spaced level prices from `price_low` to `price_high`,
/// inclusive, rounded to the asset's tick. A single level rests at the
/// midpoint.
#[must_use]
pub fn level_prices(
    price_low: Price,
    price_high: Price,
    levels: u32,
    metadata: &AssetMetadata,
) -> Vec<Price> {
    let levels = levels.max(1);
    if levels == 1 {
        let mid = Price::new((price_low.inner() + price_high.inner()) / Decimal::TWO);
        return vec![metadata.round_price(mid)];
    }
    let step = (price_high.inner() - price_low.inner()) / Decimal::from(levels - 1);
    (0..levels)
        .map(|i| {
            metadata.round_price(Price::new(price_low.inner() + step * Decimal::from(i)))
        })
        .collect()
}

/// Split `total` evenly across `levels`, each size rounded to the
/// asset's precision with the last level absorbing the residue.
#[must_use]
pub fn level_sizes(total: Size, levels: u32, metadata: &AssetMetadata) -> Vec<Size> {
    let levels = levels.max(1);
    let even = metadata.round_size(Size::new(total.inner() / Decimal::from(levels)));
    let mut sizes: Vec<Size> = (0..levels - 1).map(|_| even).collect();
    let allocated: Decimal = sizes.iter().map(|s| s.inner()).sum();
    sizes.push(metadata.round_size(Size::new(total.inner() - allocated)));
    sizes
}
