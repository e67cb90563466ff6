//! Limit-chase re-pegging.
//!
//! A chasing limit order follows the market from a fixed tick offset,
//! cancelling and re-placing whenever the resting price drifts, up to
//! `max_chases` re-pegs before the give behavior applies.

use rust_decimal::Decimal;

use sentinel_core::{OrderSide, Price};

use crate::order::AdvancedOrder;

/// The price a chasing limit should rest at: `offset_ticks` inside the
/// current market price (below it for a buy, above it for a sell).
#[must_use]
pub fn desired_price(side: OrderSide, market: Price, tick: Price, offset_ticks: u32) -> Price {
    let offset = tick.inner() * Decimal::from(offset_ticks);
    let raw = match side {
        OrderSide::Buy => Price::new(market.inner() - offset),
        OrderSide::Sell => Price::new(market.inner() + offset),
    };
    raw.round_to_tick(tick)
}

/// Whether the resting price has drifted far enough from the desired
/// peg to justify a replacement. Within one tick is close enough.
#[must_use]
pub fn has_drifted(resting: Price, desired: Price, tick: Price) -> bool {
    resting.distance(desired) > tick.inner()
}

/// Re-pegs performed so far, recomputed from the execution log so a
/// restart cannot reset the chase budget.
#[must_use]
pub fn chases_done(order: &AdvancedOrder) -> u32 {
    order
        .execution_log
        .iter()
        .filter(|e| e.action == "repeg")
        .count() as u32
}

/// The price of the most recently pegged child order.
#[must_use]
pub fn last_peg_price(order: &AdvancedOrder) -> Option<Price> {
    order
        .execution_log
        .iter()
        .rev()
        .find(|e| e.action == "repeg" || e.action == "place")
        .and_then(|e| e.price)
}
