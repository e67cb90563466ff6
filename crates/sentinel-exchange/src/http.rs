//! HTTP implementation of the exchange client.
//!
//! Posts typed JSON requests to the exchange's info/exchange endpoint
//! pair and converts the loosely-shaped responses into the typed values
//! the rest of the engine consumes. Response-shape tolerance lives here
//! and nowhere else.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sentinel_core::{
    AssetMetadata, BracketRequest, CancelRequest, LeverageRequest, MarketData, OpenOrder,
    OrderKind, OrderRequest, OrderSide, Position, Price, Size,
};

use crate::client::{BoxFuture, BracketOutcome, ExchangeClient, OrderOutcome};
use crate::error::{ExchangeError, ExchangeResult};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request type for the info endpoint.
#[derive(Debug, Serialize)]
struct InfoRequest {
    #[serde(rename = "type")]
    request_type: String,
}

/// Raw asset row from the meta response.
#[derive(Debug, Deserialize)]
struct RawAssetMeta {
    name: String,
    #[serde(rename = "szDecimals")]
    sz_decimals: u8,
    #[serde(rename = "maxLeverage")]
    max_leverage: u32,
    #[serde(rename = "tickSize", default)]
    tick_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetaResponse {
    universe: Vec<RawAssetMeta>,
}

/// Raw position row from the clearinghouse state response.
#[derive(Debug, Deserialize)]
struct RawPositionRow {
    position: RawPosition,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    coin: String,
    /// Signed size as a decimal string; sign encodes side.
    szi: String,
    #[serde(rename = "entryPx")]
    entry_px: Option<String>,
    #[serde(rename = "markPx", default)]
    mark_px: Option<String>,
    #[serde(rename = "liquidationPx", default)]
    liquidation_px: Option<String>,
    #[serde(rename = "unrealizedPnl", default)]
    unrealized_pnl: Option<String>,
    #[serde(default)]
    leverage: Option<RawLeverage>,
}

#[derive(Debug, Deserialize)]
struct RawLeverage {
    value: u32,
}

#[derive(Debug, Deserialize)]
struct RawClearinghouseState {
    #[serde(rename = "assetPositions", default)]
    asset_positions: Vec<RawPositionRow>,
}

/// Raw open order row.
#[derive(Debug, Deserialize)]
struct RawOpenOrder {
    coin: String,
    oid: u64,
    side: String,
    #[serde(rename = "limitPx")]
    limit_px: String,
    sz: String,
    #[serde(rename = "reduceOnly", default)]
    reduce_only: bool,
    #[serde(rename = "orderType", default)]
    order_type: Option<String>,
    #[serde(rename = "triggerPx", default)]
    trigger_px: Option<String>,
}

/// Raw per-order status from an order action response.
#[derive(Debug, Deserialize)]
struct RawOrderStatus {
    #[serde(default)]
    resting: Option<RawResting>,
    #[serde(default)]
    filled: Option<RawFilled>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResting {
    oid: u64,
}

#[derive(Debug, Deserialize)]
struct RawFilled {
    oid: u64,
    #[serde(rename = "avgPx")]
    avg_px: String,
    #[serde(rename = "totalSz")]
    total_sz: String,
}

/// HTTP exchange client.
///
/// `info_url` serves read-only queries; `exchange_url` serves order
/// actions. Request signing happens in the SDK gateway this client posts
/// to, not here.
pub struct HttpExchangeClient {
    client: Client,
    info_url: String,
    exchange_url: String,
    /// Account identifier included in user-scoped queries.
    account: String,
}

impl HttpExchangeClient {
    pub fn new(
        info_url: impl Into<String>,
        exchange_url: impl Into<String>,
        account: impl Into<String>,
    ) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            info_url: info_url.into(),
            exchange_url: exchange_url.into(),
            account: account.into(),
        })
    }

    async fn post_info(&self, body: serde_json::Value) -> ExchangeResult<serde_json::Value> {
        let response = self
            .client
            .post(&self.info_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Api(format!("HTTP {status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(format!("Failed to parse response: {e}")))
    }

    async fn post_action(&self, body: serde_json::Value) -> ExchangeResult<serde_json::Value> {
        let response = self
            .client
            .post(&self.exchange_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Api(format!("HTTP {status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(format!("Failed to parse response: {e}")))
    }

    fn parse_price(s: &str, what: &str) -> ExchangeResult<Price> {
        Price::from_str(s).map_err(|e| ExchangeError::Parse(format!("{what} '{s}': {e}")))
    }

    fn parse_size(s: &str, what: &str) -> ExchangeResult<Size> {
        Size::from_str(s).map_err(|e| ExchangeError::Parse(format!("{what} '{s}': {e}")))
    }

    async fn fetch_metadata(&self, symbol: &str) -> ExchangeResult<AssetMetadata> {
        let request = serde_json::to_value(InfoRequest {
            request_type: "meta".to_string(),
        })
        .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let body = self.post_info(request).await?;
        let meta: RawMetaResponse = serde_json::from_value(body)
            .map_err(|e| ExchangeError::Parse(format!("meta response: {e}")))?;

        let raw = meta
            .universe
            .into_iter()
            .find(|a| a.name == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        // Missing tickSize means the default minimum increment applies
        let tick_size = match raw.tick_size.as_deref() {
            Some(ts) => Self::parse_price(ts, "tickSize")?,
            None => {
                debug!(symbol = %raw.name, "No tickSize in meta, using 0.01");
                Price::from_str("0.01").unwrap_or(Price::ZERO)
            }
        };

        Ok(AssetMetadata {
            symbol: raw.name,
            tick_size,
            sz_decimals: raw.sz_decimals,
            max_leverage: raw.max_leverage,
        })
    }

    async fn fetch_positions(&self) -> ExchangeResult<Vec<Position>> {
        let body = self
            .post_info(serde_json::json!({
                "type": "clearinghouseState",
                "user": self.account,
            }))
            .await?;

        let state: RawClearinghouseState = serde_json::from_value(body)
            .map_err(|e| ExchangeError::Parse(format!("clearinghouseState: {e}")))?;

        let mut positions = Vec::new();
        for row in state.asset_positions {
            let raw = row.position;
            let size = rust_decimal::Decimal::from_str(&raw.szi)
                .map_err(|e| ExchangeError::Parse(format!("szi '{}': {e}", raw.szi)))?;
            if size.is_zero() {
                continue;
            }

            let entry_price = match raw.entry_px.as_deref() {
                Some(px) => Self::parse_price(px, "entryPx")?,
                None => {
                    warn!(coin = %raw.coin, "Position missing entryPx, skipping");
                    continue;
                }
            };
            let mark_price = match raw.mark_px.as_deref() {
                Some(px) => Self::parse_price(px, "markPx")?,
                None => entry_price,
            };
            let liquidation_price = match raw.liquidation_px.as_deref() {
                Some(px) => Some(Self::parse_price(px, "liquidationPx")?),
                None => None,
            };
            let unrealized_pnl = match raw.unrealized_pnl.as_deref() {
                Some(v) => rust_decimal::Decimal::from_str(v)
                    .map_err(|e| ExchangeError::Parse(format!("unrealizedPnl '{v}': {e}")))?,
                None => rust_decimal::Decimal::ZERO,
            };

            positions.push(Position {
                symbol: raw.coin,
                size,
                entry_price,
                mark_price,
                liquidation_price,
                leverage: raw.leverage.map(|l| l.value).unwrap_or(1),
                unrealized_pnl,
            });
        }

        Ok(positions)
    }

    async fn fetch_open_orders(&self) -> ExchangeResult<Vec<OpenOrder>> {
        let body = self
            .post_info(serde_json::json!({
                "type": "openOrders",
                "user": self.account,
            }))
            .await?;

        let raw_orders: Vec<RawOpenOrder> = serde_json::from_value(body)
            .map_err(|e| ExchangeError::Parse(format!("openOrders: {e}")))?;

        let mut orders = Vec::new();
        for raw in raw_orders {
            let side = match raw.side.as_str() {
                "B" | "buy" => OrderSide::Buy,
                "A" | "S" | "sell" => OrderSide::Sell,
                other => {
                    warn!(side = %other, oid = raw.oid, "Unknown order side, skipping");
                    continue;
                }
            };

            let price = Self::parse_price(&raw.limit_px, "limitPx")?;
            let kind = match (raw.order_type.as_deref(), raw.trigger_px.as_deref()) {
                (Some("stopMarket" | "sl"), Some(px)) => OrderKind::StopMarket {
                    trigger_price: Self::parse_price(px, "triggerPx")?,
                },
                (Some("takeProfitMarket" | "tp"), Some(px)) => OrderKind::TakeProfitMarket {
                    trigger_price: Self::parse_price(px, "triggerPx")?,
                },
                _ => OrderKind::Limit,
            };

            orders.push(OpenOrder {
                oid: raw.oid,
                symbol: raw.coin,
                side,
                price,
                size: Self::parse_size(&raw.sz, "sz")?,
                reduce_only: raw.reduce_only,
                kind,
            });
        }

        Ok(orders)
    }

    async fn fetch_market_data(&self) -> ExchangeResult<Vec<MarketData>> {
        let body = self
            .post_info(serde_json::json!({ "type": "allMids" }))
            .await?;

        let mids: std::collections::HashMap<String, String> = serde_json::from_value(body)
            .map_err(|e| ExchangeError::Parse(format!("allMids: {e}")))?;

        let now = chrono::Utc::now();
        let mut data = Vec::with_capacity(mids.len());
        for (symbol, px) in mids {
            data.push(MarketData {
                symbol,
                price: Self::parse_price(&px, "mid")?,
                received_at: now,
            });
        }
        Ok(data)
    }

    fn order_wire(request: &OrderRequest) -> serde_json::Value {
        let mut wire = serde_json::json!({
            "coin": request.symbol,
            "isBuy": request.side == OrderSide::Buy,
            "limitPx": request.price.to_string(),
            "sz": request.size.to_string(),
            "reduceOnly": request.reduce_only,
            "cloid": request.cloid.as_str(),
        });
        match request.kind {
            OrderKind::Limit => {
                wire["orderType"] = serde_json::json!({ "limit": { "tif": "Gtc" } });
            }
            OrderKind::Market => {
                wire["orderType"] = serde_json::json!({ "limit": { "tif": "Ioc" } });
            }
            OrderKind::StopMarket { trigger_price } => {
                wire["orderType"] = serde_json::json!({
                    "trigger": { "isMarket": true, "triggerPx": trigger_price.to_string(), "tpsl": "sl" }
                });
            }
            OrderKind::TakeProfitMarket { trigger_price } => {
                wire["orderType"] = serde_json::json!({
                    "trigger": { "isMarket": true, "triggerPx": trigger_price.to_string(), "tpsl": "tp" }
                });
            }
        }
        wire
    }

    fn parse_statuses(body: &serde_json::Value) -> ExchangeResult<Vec<OrderOutcome>> {
        let statuses = body
            .pointer("/response/data/statuses")
            .and_then(|s| s.as_array())
            .ok_or_else(|| ExchangeError::Parse("order response missing statuses".to_string()))?;

        let mut outcomes = Vec::with_capacity(statuses.len());
        for status in statuses {
            let raw: RawOrderStatus = serde_json::from_value(status.clone())
                .map_err(|e| ExchangeError::Parse(format!("order status: {e}")))?;

            let outcome = if let Some(resting) = raw.resting {
                OrderOutcome::Resting { oid: resting.oid }
            } else if let Some(filled) = raw.filled {
                OrderOutcome::Filled {
                    oid: filled.oid,
                    avg_price: Self::parse_price(&filled.avg_px, "avgPx")?,
                    size: Self::parse_size(&filled.total_sz, "totalSz")?,
                }
            } else if let Some(error) = raw.error {
                OrderOutcome::Rejected { reason: error }
            } else {
                return Err(ExchangeError::Parse(
                    "order status has neither resting, filled, nor error".to_string(),
                ));
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn submit_orders(&self, orders: Vec<serde_json::Value>) -> ExchangeResult<Vec<OrderOutcome>> {
        let count = orders.len();
        let body = self
            .post_action(serde_json::json!({
                "action": { "type": "order", "orders": orders, "grouping": "na" },
                "account": self.account,
            }))
            .await?;

        let outcomes = Self::parse_statuses(&body)?;
        if outcomes.len() != count {
            return Err(ExchangeError::Parse(format!(
                "expected {count} statuses, got {}",
                outcomes.len()
            )));
        }
        Ok(outcomes)
    }
}

impl ExchangeClient for HttpExchangeClient {
    fn asset_metadata(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<AssetMetadata>> {
        let symbol = symbol.to_string();
        Box::pin(async move { self.fetch_metadata(&symbol).await })
    }

    fn positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<Position>>> {
        Box::pin(self.fetch_positions())
    }

    fn open_orders(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        Box::pin(self.fetch_open_orders())
    }

    fn market_data(&self) -> BoxFuture<'_, ExchangeResult<Vec<MarketData>>> {
        Box::pin(self.fetch_market_data())
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderOutcome>> {
        Box::pin(async move {
            info!(
                symbol = %request.symbol,
                side = %request.side,
                price = %request.price,
                size = %request.size,
                reduce_only = request.reduce_only,
                "Placing order"
            );
            let mut outcomes = self.submit_orders(vec![Self::order_wire(&request)]).await?;
            Ok(outcomes.remove(0))
        })
    }

    fn place_bracket(
        &self,
        request: BracketRequest,
    ) -> BoxFuture<'_, ExchangeResult<BracketOutcome>> {
        Box::pin(async move {
            let mut wires = vec![Self::order_wire(&request.entry)];
            if let Some(sl) = &request.stop_loss {
                wires.push(Self::order_wire(sl));
            }
            if let Some(tp) = &request.take_profit {
                wires.push(Self::order_wire(tp));
            }

            info!(
                symbol = %request.entry.symbol,
                legs = wires.len(),
                "Placing bracket order"
            );

            let mut outcomes = self.submit_orders(wires).await?.into_iter();
            let entry = outcomes
                .next()
                .ok_or_else(|| ExchangeError::Parse("missing entry status".to_string()))?;
            let stop_loss = request.stop_loss.as_ref().and_then(|_| outcomes.next());
            let take_profit = request.take_profit.as_ref().and_then(|_| outcomes.next());

            Ok(BracketOutcome {
                entry,
                stop_loss,
                take_profit,
            })
        })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            let body = self
                .post_action(serde_json::json!({
                    "action": {
                        "type": "cancel",
                        "cancels": [{ "coin": request.symbol, "oid": request.oid }],
                    },
                    "account": self.account,
                }))
                .await?;

            let status = body
                .pointer("/response/data/statuses/0")
                .and_then(|s| s.as_str());
            match status {
                Some("success") => Ok(()),
                Some(other) => Err(ExchangeError::Api(format!(
                    "cancel {} on {}: {other}",
                    request.oid, request.symbol
                ))),
                None => Err(ExchangeError::Parse(
                    "cancel response missing status".to_string(),
                )),
            }
        })
    }

    fn update_leverage(&self, request: LeverageRequest) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.post_action(serde_json::json!({
                "action": {
                    "type": "updateLeverage",
                    "coin": request.symbol,
                    "leverage": request.leverage,
                    "isCross": request.is_cross,
                },
                "account": self.account,
            }))
            .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::ClientOrderId;

    fn limit_request() -> OrderRequest {
        OrderRequest {
            cloid: ClientOrderId::from_string("snt_test_1".to_string()),
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            price: Price::new(dec!(64000)),
            size: Size::new(dec!(0.1)),
            reduce_only: false,
            kind: OrderKind::Limit,
        }
    }

    #[test]
    fn test_order_wire_shape() {
        let wire = HttpExchangeClient::order_wire(&limit_request());
        assert_eq!(wire["coin"], "BTC");
        assert_eq!(wire["isBuy"], true);
        assert_eq!(wire["limitPx"], "64000");
        assert_eq!(wire["orderType"]["limit"]["tif"], "Gtc");
    }

    #[test]
    fn test_order_wire_stop_trigger() {
        let mut request = limit_request();
        request.reduce_only = true;
        request.kind = OrderKind::StopMarket {
            trigger_price: Price::new(dec!(60000)),
        };
        let wire = HttpExchangeClient::order_wire(&request);
        assert_eq!(wire["orderType"]["trigger"]["tpsl"], "sl");
        assert_eq!(wire["orderType"]["trigger"]["triggerPx"], "60000");
    }

    #[test]
    fn test_parse_statuses_mixed() {
        let body = serde_json::json!({
            "response": { "data": { "statuses": [
                { "resting": { "oid": 7 } },
                { "filled": { "oid": 8, "avgPx": "100.5", "totalSz": "2" } },
                { "error": "insufficient margin" },
            ]}}
        });
        let outcomes = HttpExchangeClient::parse_statuses(&body).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], OrderOutcome::Resting { oid: 7 });
        assert!(matches!(outcomes[1], OrderOutcome::Filled { oid: 8, .. }));
        assert!(matches!(outcomes[2], OrderOutcome::Rejected { .. }));
    }

    #[test]
    fn test_parse_statuses_missing() {
        let body = serde_json::json!({ "response": {} });
        assert!(HttpExchangeClient::parse_statuses(&body).is_err());
    }
}
