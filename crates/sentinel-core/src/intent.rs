//! Trading intents proposed by the decision layer.
//!
//! An intent is one desired exchange action. The decision layer (an LLM
//! behind an opaque boundary) emits these as loosely-typed JSON; numeric
//! fields stay as decimal strings here and are parsed by the validator,
//! which owns the rejection taxonomy for malformed values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The action an intent asks the engine to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    Buy,
    Sell,
    Close,
    StopLoss,
    TakeProfit,
    CancelOrder,
    Hold,
}

impl IntentAction {
    /// Entry actions open or increase exposure and must arrive bracketed.
    #[must_use]
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }

    /// Protective actions manage an existing position's bracket.
    #[must_use]
    pub fn is_protective(&self) -> bool {
        matches!(self, Self::StopLoss | Self::TakeProfit)
    }
}

impl fmt::Display for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Close => "close",
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::CancelOrder => "cancel_order",
            Self::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// Direction of the exposure an intent refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// One desired exchange action from the decision layer.
///
/// Numeric fields (`size`, `entry_price`, `trigger_price`) are decimal
/// strings exactly as the decision layer produced them; parsing happens in
/// the validator so a malformed value becomes a structured rejection
/// naming the field rather than a deserialization failure that drops the
/// whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingIntent {
    pub action: IntentAction,
    pub symbol: String,
    /// Absent for cancel_order and hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<PositionSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Uncapped here; capped to the asset's max leverage during validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<String>,
    /// Required only for cancel_order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TradingIntent {
    /// Whether a buy/sell intent opens new exposure for the given current
    /// position side (as opposed to reducing or flipping within it).
    ///
    /// A buy with no position or with an existing long opens/extends long
    /// exposure; a buy against a short is a reduction and carries no
    /// bracket obligation of its own.
    #[must_use]
    pub fn opens_exposure(&self, current_side: Option<PositionSide>) -> bool {
        if !self.action.is_entry() {
            return false;
        }
        let entry_side = match self.action {
            IntentAction::Buy => PositionSide::Long,
            IntentAction::Sell => PositionSide::Short,
            _ => unreachable!(),
        };
        match current_side {
            None => true,
            Some(side) => side == entry_side,
        }
    }
}
