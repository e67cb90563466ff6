//! Execution request and result types.
//!
//! Requests are the fully-typed, already-rounded parameters handed to the
//! exchange boundary. Results carry the per-intent outcome taxonomy:
//! every intent in a batch produces exactly one `ExecutionResult` with a
//! human-readable reason, and a batch aggregates into an
//! `ExecutionSummary`.

use crate::{IntentAction, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Order primitives
// ============================================================================

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Client order ID for idempotency.
///
/// Every order submitted to the exchange carries a unique cloid so that
/// a retry after an ambiguous failure cannot double-place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `snt_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("snt_{ts}_{uuid_short}"))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order flavor, including protective trigger orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Market,
    /// Reduce-only stop, fires when price crosses the trigger adversely.
    StopMarket { trigger_price: Price },
    /// Reduce-only take-profit, fires when price crosses favorably.
    TakeProfitMarket { trigger_price: Price },
}

impl OrderKind {
    /// The trigger level for protective kinds.
    #[must_use]
    pub fn trigger_price(&self) -> Option<Price> {
        match self {
            Self::StopMarket { trigger_price } | Self::TakeProfitMarket { trigger_price } => {
                Some(*trigger_price)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_protective(&self) -> bool {
        self.trigger_price().is_some()
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Fully-typed order placement parameters.
///
/// Price and size are rounded to the asset's constraints immediately
/// before this request is built; the exchange boundary submits it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub cloid: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub reduce_only: bool,
    pub kind: OrderKind,
}

/// Entry order submitted together with its protective bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketRequest {
    pub entry: OrderRequest,
    pub stop_loss: Option<OrderRequest>,
    pub take_profit: Option<OrderRequest>,
}

/// Cancel parameters for one resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub symbol: String,
    pub oid: u64,
}

/// Leverage update parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverageRequest {
    pub symbol: String,
    pub leverage: u32,
    pub is_cross: bool,
}

/// One resting order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub oid: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub reduce_only: bool,
    pub kind: OrderKind,
}

// ============================================================================
// Outcome taxonomy
// ============================================================================

/// Why an intent was rejected.
///
/// Rejections are resolved locally: the intent becomes a failed result,
/// it is never thrown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// A required numeric field is missing, non-positive, or unparseable.
    InvalidInput { field: String, detail: String },
    BelowMinimumNotional { notional: Decimal, minimum: Decimal },
    /// Protective order on the wrong side of the current price.
    WrongDirection { detail: String },
    /// Entry price outside the volatility-adaptive band around market.
    PriceUnreasonable {
        submitted: Price,
        market: Price,
        max_deviation_pct: Decimal,
        /// Band-edge price; applied only when correction is enabled.
        suggested: Option<Price>,
    },
    /// Entry batch opens exposure without a paired stop-loss. Batch-fatal.
    MissingStopLoss { symbol: String },
    /// An existing position has no resting stop-loss. Batch-fatal.
    UnprotectedPosition { symbol: String },
    /// A protective-order cancellation failed; dependent placements for
    /// the symbol are blocked this cycle.
    CancellationFailed { symbol: String, oid: u64 },
    ExchangeError { detail: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { field, detail } => {
                write!(f, "invalid input in field '{field}': {detail}")
            }
            Self::BelowMinimumNotional { notional, minimum } => {
                write!(f, "notional {notional} below exchange minimum {minimum}")
            }
            Self::WrongDirection { detail } => write!(f, "wrong direction: {detail}"),
            Self::PriceUnreasonable {
                submitted,
                market,
                max_deviation_pct,
                ..
            } => write!(
                f,
                "price {submitted} too far from market {market} (max {max_deviation_pct}%)"
            ),
            Self::MissingStopLoss { symbol } => {
                write!(f, "{symbol}: new exposure without a paired stop-loss")
            }
            Self::UnprotectedPosition { symbol } => {
                write!(f, "{symbol}: open position has no resting stop-loss")
            }
            Self::CancellationFailed { symbol, oid } => {
                write!(f, "{symbol}: failed to cancel order {oid}")
            }
            Self::ExchangeError { detail } => write!(f, "exchange error: {detail}"),
        }
    }
}

/// Why an intent was skipped without harm.
///
/// Skips count as successes: no harmful action was taken and none was
/// needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A materially identical order is already resting or already in the
    /// batch.
    DuplicateOrder { symbol: String },
    /// A human adjusted this symbol's protective orders; automation stands
    /// down.
    ManualOverrideActive { symbol: String },
    /// The resting bracket already matches the proposed one within
    /// tolerance.
    BracketUnchanged { symbol: String },
    /// A more conservative stop-loss candidate in the same batch won;
    /// only one stop-loss may rest per symbol.
    SupersededStop { symbol: String },
    /// Explicit hold intent.
    Hold,
    /// Agent is in observation mode; nothing is placed.
    ObservationMode,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateOrder { symbol } => {
                write!(f, "{symbol}: materially identical order already exists")
            }
            Self::ManualOverrideActive { symbol } => {
                write!(f, "{symbol}: manual override active, automation skipped")
            }
            Self::BracketUnchanged { symbol } => {
                write!(f, "{symbol}: resting bracket matches within tolerance")
            }
            Self::SupersededStop { symbol } => {
                write!(f, "{symbol}: superseded by a more conservative stop-loss")
            }
            Self::Hold => write!(f, "hold"),
            Self::ObservationMode => write!(f, "observation mode, not placed"),
        }
    }
}

/// Outcome of one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Executed,
    Skipped(SkipReason),
    Rejected(RejectReason),
}

impl Outcome {
    /// Skips are successes: no harmful action was taken.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Executed | Self::Skipped(_))
    }
}

/// Per-intent result with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action: IntentAction,
    pub symbol: String,
    pub outcome: Outcome,
    pub detail: String,
}

impl ExecutionResult {
    #[must_use]
    pub fn executed(action: IntentAction, symbol: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            outcome: Outcome::Executed,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn skipped(action: IntentAction, symbol: impl Into<String>, reason: SkipReason) -> Self {
        let detail = reason.to_string();
        Self {
            action,
            symbol: symbol.into(),
            outcome: Outcome::Skipped(reason),
            detail,
        }
    }

    #[must_use]
    pub fn rejected(action: IntentAction, symbol: impl Into<String>, reason: RejectReason) -> Self {
        let detail = reason.to_string();
        Self {
            action,
            symbol: symbol.into(),
            outcome: Outcome::Rejected(reason),
            detail,
        }
    }
}

/// Aggregated batch counts plus the per-intent results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_actions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub skipped_actions: usize,
    pub results: Vec<ExecutionResult>,
}

impl ExecutionSummary {
    /// Aggregate results into a summary.
    #[must_use]
    pub fn from_results(results: Vec<ExecutionResult>) -> Self {
        let mut summary = Self {
            total_actions: results.len(),
            ..Self::default()
        };
        for result in &results {
            match &result.outcome {
                Outcome::Executed => summary.successful_executions += 1,
                Outcome::Skipped(_) => summary.skipped_actions += 1,
                Outcome::Rejected(_) => summary.failed_executions += 1,
            }
        }
        summary.results = results;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_order_id_unique_and_prefixed() {
        let id1 = ClientOrderId::new();
        let id2 = ClientOrderId::new();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("snt_"));
    }

    #[test]
    fn test_order_kind_trigger() {
        let stop = OrderKind::StopMarket {
            trigger_price: Price::new(dec!(59000)),
        };
        assert_eq!(stop.trigger_price(), Some(Price::new(dec!(59000))));
        assert!(stop.is_protective());
        assert!(!OrderKind::Limit.is_protective());
    }

    #[test]
    fn test_outcome_success_semantics() {
        assert!(Outcome::Executed.is_success());
        assert!(Outcome::Skipped(SkipReason::Hold).is_success());
        assert!(!Outcome::Rejected(RejectReason::ExchangeError {
            detail: "timeout".to_string()
        })
        .is_success());
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            ExecutionResult::executed(IntentAction::Buy, "BTC", "placed"),
            ExecutionResult::skipped(
                IntentAction::Buy,
                "BTC",
                SkipReason::DuplicateOrder {
                    symbol: "BTC".to_string(),
                },
            ),
            ExecutionResult::rejected(
                IntentAction::StopLoss,
                "BTC",
                RejectReason::WrongDirection {
                    detail: "stop above mark for long".to_string(),
                },
            ),
        ];
        let summary = ExecutionSummary::from_results(results);
        assert_eq!(summary.total_actions, 3);
        assert_eq!(summary.successful_executions, 1);
        assert_eq!(summary.skipped_actions, 1);
        assert_eq!(summary.failed_executions, 1);
    }
}
