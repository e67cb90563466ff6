//! Exchange client trait for order placement and market data.
//!
//! Provides a trait-based abstraction over the exchange SDK. This allows
//! for:
//! - Dependency injection for testing
//! - Isolation of loosely-typed SDK responses at one boundary
//! - Swappable transport (HTTP today)

use std::pin::Pin;
use std::sync::Arc;

use sentinel_core::{
    AssetMetadata, BracketRequest, CancelRequest, LeverageRequest, MarketData, OpenOrder,
    OrderRequest, Position, Price, Size,
};

use crate::error::ExchangeResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Typed outcome of a single order placement.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// Order is resting on the book.
    Resting { oid: u64 },
    /// Order filled (fully) on placement.
    Filled {
        oid: u64,
        avg_price: Price,
        size: Size,
    },
    /// Exchange rejected the order.
    Rejected { reason: String },
}

impl OrderOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Exchange order id, when the order was accepted.
    #[must_use]
    pub fn oid(&self) -> Option<u64> {
        match self {
            Self::Resting { oid } | Self::Filled { oid, .. } => Some(*oid),
            Self::Rejected { .. } => None,
        }
    }
}

/// Outcome of a bracket placement: entry plus its protective legs.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOutcome {
    pub entry: OrderOutcome,
    pub stop_loss: Option<OrderOutcome>,
    pub take_profit: Option<OrderOutcome>,
}

/// Trait for the exchange collaborator.
///
/// All methods re-fetch exchange state; nothing here caches across
/// calls. Callers that need caching (asset metadata) layer it on top.
pub trait ExchangeClient: Send + Sync {
    /// Fetch per-symbol constraints (tick size, size decimals, max leverage).
    fn asset_metadata(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<AssetMetadata>>;

    /// Fetch all open positions.
    fn positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<Position>>>;

    /// Fetch all resting orders.
    fn open_orders(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>>;

    /// Fetch current market data for all symbols.
    fn market_data(&self) -> BoxFuture<'_, ExchangeResult<Vec<MarketData>>>;

    /// Place a single order.
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderOutcome>>;

    /// Place an entry order together with its protective bracket.
    fn place_bracket(&self, request: BracketRequest)
        -> BoxFuture<'_, ExchangeResult<BracketOutcome>>;

    /// Cancel one resting order.
    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, ExchangeResult<()>>;

    /// Update leverage for a symbol.
    fn update_leverage(&self, request: LeverageRequest) -> BoxFuture<'_, ExchangeResult<()>>;
}

/// Arc wrapper for ExchangeClient trait objects.
pub type DynExchangeClient = Arc<dyn ExchangeClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_outcome_accessors() {
        let resting = OrderOutcome::Resting { oid: 42 };
        assert!(resting.is_accepted());
        assert_eq!(resting.oid(), Some(42));

        let filled = OrderOutcome::Filled {
            oid: 43,
            avg_price: Price::new(dec!(100)),
            size: Size::new(dec!(1)),
        };
        assert_eq!(filled.oid(), Some(43));

        let rejected = OrderOutcome::Rejected {
            reason: "margin".to_string(),
        };
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.oid(), None);
    }
}
