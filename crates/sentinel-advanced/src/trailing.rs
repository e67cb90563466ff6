//! Trailing take-profit evaluation.
//!
//! Tracks the position's favorable high-water mark once `min_profit`
//! has been reached and triggers a close when price retraces
//! `trail_distance` from that mark. The order's side is the *closing*
//! side: a sell closes a long (favorable direction up), a buy closes a
//! short (favorable direction down).

use sentinel_core::{OrderSide, Price};

/// Outcome of one trailing evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailAction {
    /// Min-profit not yet reached; the trail is dormant.
    Inactive,
    /// The favorable extreme advanced; persist the new mark.
    AdvanceHighWater(Price),
    /// Price retraced the trail distance from the mark; close now.
    Trigger { high_water: Price },
    /// Active, no change.
    Hold,
}

/// Evaluate one price sample against the trail state.
#[must_use]
pub fn evaluate(
    close_side: OrderSide,
    entry: Price,
    high_water: Option<Price>,
    price: Price,
    trail_distance: Price,
    min_profit: Price,
) -> TrailAction {
    match close_side {
        // Closing a long: favorable direction is up
        OrderSide::Sell => {
            let Some(hwm) = high_water else {
                if price.inner() >= entry.inner() + min_profit.inner() {
                    return TrailAction::AdvanceHighWater(price);
                }
                return TrailAction::Inactive;
            };
            if price > hwm {
                return TrailAction::AdvanceHighWater(price);
            }
            if price.inner() <= hwm.inner() - trail_distance.inner() {
                return TrailAction::Trigger { high_water: hwm };
            }
            TrailAction::Hold
        }
        // Closing a short: favorable direction is down
        OrderSide::Buy => {
            let Some(hwm) = high_water else {
                if price.inner() <= entry.inner() - min_profit.inner() {
                    return TrailAction::AdvanceHighWater(price);
                }
                return TrailAction::Inactive;
            };
            if price < hwm {
                return TrailAction::AdvanceHighWater(price);
            }
            if price.inner() >= hwm.inner() + trail_distance.inner() {
                return TrailAction::Trigger { high_water: hwm };
            }
            TrailAction::Hold
        }
    }
}
