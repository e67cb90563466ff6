//! Mock exchange for testing.
//!
//! Records every call and serves scriptable state, behaving like a
//! small in-memory exchange: placed orders rest on the book (and show up
//! in subsequent `open_orders` calls) unless fill-on-place is enabled,
//! and successful cancels remove resting orders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use sentinel_core::{
    AssetMetadata, BracketRequest, CancelRequest, LeverageRequest, MarketData, OpenOrder,
    OrderRequest, Position,
};

use crate::client::{BoxFuture, BracketOutcome, ExchangeClient, OrderOutcome};
use crate::error::{ExchangeError, ExchangeResult};

/// Mock exchange client for testing.
pub struct MockExchange {
    metadata: Mutex<HashMap<String, AssetMetadata>>,
    positions: Mutex<Vec<Position>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    market_data: Mutex<Vec<MarketData>>,

    /// Recorded placements for verification.
    placed: Mutex<Vec<OrderRequest>>,
    /// Recorded bracket placements.
    brackets: Mutex<Vec<BracketRequest>>,
    /// Recorded cancels.
    cancels: Mutex<Vec<CancelRequest>>,
    /// Recorded leverage updates.
    leverage_updates: Mutex<Vec<LeverageRequest>>,

    /// One-shot rejection reasons, consumed in order by placements.
    place_rejections: Mutex<Vec<String>>,
    next_oid: AtomicU64,
    fill_on_place: AtomicBool,
    fail_cancels: AtomicBool,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            metadata: Mutex::new(HashMap::new()),
            positions: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            market_data: Mutex::new(Vec::new()),
            placed: Mutex::new(Vec::new()),
            brackets: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            leverage_updates: Mutex::new(Vec::new()),
            place_rejections: Mutex::new(Vec::new()),
            next_oid: AtomicU64::new(1),
            fill_on_place: AtomicBool::new(false),
            fail_cancels: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // State setters
    // ------------------------------------------------------------------

    pub fn set_metadata(&self, metadata: AssetMetadata) {
        self.metadata
            .lock()
            .insert(metadata.symbol.clone(), metadata);
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock() = positions;
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        *self.open_orders.lock() = orders;
    }

    pub fn set_market_data(&self, data: Vec<MarketData>) {
        *self.market_data.lock() = data;
    }

    /// When set, placements fill immediately at the request price
    /// instead of resting.
    pub fn set_fill_on_place(&self, fill: bool) {
        self.fill_on_place.store(fill, Ordering::SeqCst);
    }

    /// When set, every cancel fails.
    pub fn set_fail_cancels(&self, fail: bool) {
        self.fail_cancels.store(fail, Ordering::SeqCst);
    }

    /// Queue a one-shot rejection for the next placement.
    pub fn push_place_rejection(&self, reason: impl Into<String>) {
        self.place_rejections.lock().push(reason.into());
    }

    // ------------------------------------------------------------------
    // Recorded-call accessors
    // ------------------------------------------------------------------

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    pub fn placed_brackets(&self) -> Vec<BracketRequest> {
        self.brackets.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<CancelRequest> {
        self.cancels.lock().clone()
    }

    pub fn leverage_updates(&self) -> Vec<LeverageRequest> {
        self.leverage_updates.lock().clone()
    }

    pub fn resting_orders(&self) -> Vec<OpenOrder> {
        self.open_orders.lock().clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn execute_one(&self, request: &OrderRequest) -> OrderOutcome {
        if let Some(reason) = {
            let mut rejections = self.place_rejections.lock();
            if rejections.is_empty() {
                None
            } else {
                Some(rejections.remove(0))
            }
        } {
            return OrderOutcome::Rejected { reason };
        }

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        if self.fill_on_place.load(Ordering::SeqCst) {
            OrderOutcome::Filled {
                oid,
                avg_price: request.price,
                size: request.size,
            }
        } else {
            self.open_orders.lock().push(OpenOrder {
                oid,
                symbol: request.symbol.clone(),
                side: request.side,
                price: request.price,
                size: request.size,
                reduce_only: request.reduce_only,
                kind: request.kind,
            });
            OrderOutcome::Resting { oid }
        }
    }
}

impl ExchangeClient for MockExchange {
    fn asset_metadata(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<AssetMetadata>> {
        let result = self
            .metadata
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()));
        Box::pin(async move { result })
    }

    fn positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<Position>>> {
        let positions = self.positions.lock().clone();
        Box::pin(async move { Ok(positions) })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        let orders = self.open_orders.lock().clone();
        Box::pin(async move { Ok(orders) })
    }

    fn market_data(&self) -> BoxFuture<'_, ExchangeResult<Vec<MarketData>>> {
        let data = self.market_data.lock().clone();
        Box::pin(async move { Ok(data) })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderOutcome>> {
        let outcome = self.execute_one(&request);
        self.placed.lock().push(request);
        Box::pin(async move { Ok(outcome) })
    }

    fn place_bracket(
        &self,
        request: BracketRequest,
    ) -> BoxFuture<'_, ExchangeResult<BracketOutcome>> {
        let entry = self.execute_one(&request.entry);
        let stop_loss = request.stop_loss.as_ref().map(|sl| self.execute_one(sl));
        let take_profit = request.take_profit.as_ref().map(|tp| self.execute_one(tp));
        self.brackets.lock().push(request);
        Box::pin(async move {
            Ok(BracketOutcome {
                entry,
                stop_loss,
                take_profit,
            })
        })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, ExchangeResult<()>> {
        let failed = self.fail_cancels.load(Ordering::SeqCst);
        if !failed {
            self.open_orders.lock().retain(|o| o.oid != request.oid);
        }
        self.cancels.lock().push(request.clone());
        Box::pin(async move {
            if failed {
                Err(ExchangeError::Api(format!(
                    "cancel {} on {} failed",
                    request.oid, request.symbol
                )))
            } else {
                Ok(())
            }
        })
    }

    fn update_leverage(&self, request: LeverageRequest) -> BoxFuture<'_, ExchangeResult<()>> {
        self.leverage_updates.lock().push(request);
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::{ClientOrderId, OrderKind, OrderSide, Price, Size};

    fn request(symbol: &str) -> OrderRequest {
        OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            price: Price::new(dec!(100)),
            size: Size::new(dec!(1)),
            reduce_only: false,
            kind: OrderKind::Limit,
        }
    }

    #[tokio::test]
    async fn test_placed_orders_rest_on_book() {
        let mock = MockExchange::new();
        let outcome = mock.place_order(request("BTC")).await.unwrap();
        assert!(matches!(outcome, OrderOutcome::Resting { oid: 1 }));

        let orders = mock.open_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "BTC");
    }

    #[tokio::test]
    async fn test_fill_on_place() {
        let mock = MockExchange::new();
        mock.set_fill_on_place(true);
        let outcome = mock.place_order(request("BTC")).await.unwrap();
        assert!(matches!(outcome, OrderOutcome::Filled { .. }));
        assert!(mock.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_removes_resting_order() {
        let mock = MockExchange::new();
        mock.place_order(request("BTC")).await.unwrap();
        mock.cancel_order(CancelRequest {
            symbol: "BTC".to_string(),
            oid: 1,
        })
        .await
        .unwrap();
        assert!(mock.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cancel_keeps_order() {
        let mock = MockExchange::new();
        mock.place_order(request("BTC")).await.unwrap();
        mock.set_fail_cancels(true);

        let result = mock
            .cancel_order(CancelRequest {
                symbol: "BTC".to_string(),
                oid: 1,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(mock.open_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_shot_rejection() {
        let mock = MockExchange::new();
        mock.push_place_rejection("margin");

        let first = mock.place_order(request("BTC")).await.unwrap();
        assert!(matches!(first, OrderOutcome::Rejected { .. }));

        let second = mock.place_order(request("BTC")).await.unwrap();
        assert!(second.is_accepted());
    }
}
