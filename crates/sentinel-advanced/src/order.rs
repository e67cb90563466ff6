//! Persisted advanced-order records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use sentinel_core::{OrderSide, Price, Size};

/// Advanced order flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancedOrderType {
    Twap,
    LimitChase,
    Scaled,
    Iceberg,
    Oco,
    TrailingTp,
}

impl fmt::Display for AdvancedOrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Twap => "twap",
            Self::LimitChase => "limit_chase",
            Self::Scaled => "scaled",
            Self::Iceberg => "iceberg",
            Self::Oco => "oco",
            Self::TrailingTp => "trailing_tp",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status.
///
/// `active -> paused -> active` on explicit resume;
/// `cancelled` and `completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvancedStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl AdvancedStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for AdvancedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Behavior once a limit-chase exhausts its re-peg budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiveBehavior {
    /// Cancel the remaining order.
    Cancel,
    /// Convert the remainder to a market order.
    Market,
    /// Leave the last limit resting.
    Wait,
}

/// One leg of an OCO pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcoLeg {
    pub price: Price,
    /// Stop leg (trigger order) vs plain limit leg.
    pub is_stop: bool,
}

/// Type-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderParams {
    Twap {
        duration_minutes: u64,
        slices: u32,
        /// Explicit interval override; wins over duration/slices.
        #[serde(default)]
        interval_seconds: Option<u64>,
        /// Jitter each interval by up to 20% against schedule gaming.
        #[serde(default)]
        jitter: bool,
    },
    Iceberg {
        display_size: Size,
        limit_price: Price,
        /// Delay before re-exposing after a visible slice fills.
        #[serde(default)]
        refresh_delay_seconds: Option<u64>,
    },
    Oco {
        leg_a: OcoLeg,
        leg_b: OcoLeg,
        #[serde(default = "default_poll_seconds")]
        poll_seconds: u64,
    },
    TrailingTp {
        /// Distance maintained below (long) or above (short) the
        /// high-water mark.
        trail_distance: Price,
        /// Favorable move required before the trail activates.
        min_profit: Price,
        #[serde(default = "default_poll_seconds")]
        poll_seconds: u64,
        /// Best favorable price seen so far; maintained by the driver.
        #[serde(default)]
        high_water_mark: Option<Price>,
        /// Reference entry price for the min-profit gate.
        entry_price: Price,
    },
    LimitChase {
        chase_interval_seconds: u64,
        /// Ticks away from the current market price to rest at.
        offset_ticks: u32,
        max_chases: u32,
        give_behavior: GiveBehavior,
    },
    Scaled {
        price_low: Price,
        price_high: Price,
        levels: u32,
    },
}

fn default_poll_seconds() -> u64 {
    2
}

impl OrderParams {
    #[must_use]
    pub fn order_type(&self) -> AdvancedOrderType {
        match self {
            Self::Twap { .. } => AdvancedOrderType::Twap,
            Self::Iceberg { .. } => AdvancedOrderType::Iceberg,
            Self::Oco { .. } => AdvancedOrderType::Oco,
            Self::TrailingTp { .. } => AdvancedOrderType::TrailingTp,
            Self::LimitChase { .. } => AdvancedOrderType::LimitChase,
            Self::Scaled { .. } => AdvancedOrderType::Scaled,
        }
    }
}

/// Append-only execution log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    /// What happened: "slice", "repeg", "fill", "error", "completed"...
    pub action: String,
    pub size: Size,
    #[serde(default)]
    pub price: Option<Price>,
    pub detail: String,
}

/// Persisted advanced order.
///
/// The record is the source of truth for scheduling: on restart the
/// engine reloads every `active` record and resumes from
/// `executed_size` and the log, not from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedOrder {
    pub id: Uuid,
    pub user: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: AdvancedOrderType,
    pub status: AdvancedStatus,
    pub total_size: Size,
    pub executed_size: Size,
    pub params: OrderParams,
    pub child_order_ids: Vec<u64>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdvancedOrder {
    /// Create a new order in `active` status.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        total_size: Size,
        params: OrderParams,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            symbol: symbol.into(),
            side,
            order_type: params.order_type(),
            status: AdvancedStatus::Active,
            total_size,
            executed_size: Size::ZERO,
            params,
            child_order_ids: Vec::new(),
            execution_log: Vec::new(),
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn remaining_size(&self) -> Size {
        Size::new((self.total_size.inner() - self.executed_size.inner()).max(Decimal::ZERO))
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.executed_size >= self.total_size
    }

    /// Number of executed slices, recomputed from the log so restarts
    /// cannot double-count.
    #[must_use]
    pub fn slices_done(&self) -> u32 {
        self.execution_log
            .iter()
            .filter(|e| e.action == "slice")
            .count() as u32
    }

    /// Record one executed slice.
    pub fn record_slice(&mut self, size: Size, price: Price, detail: impl Into<String>) {
        sentinel_telemetry::Metrics::advanced_slice(&self.order_type.to_string());
        self.executed_size = self.executed_size + size;
        self.execution_log.push(ExecutionLogEntry {
            at: Utc::now(),
            action: "slice".to_string(),
            size,
            price: Some(price),
            detail: detail.into(),
        });
        self.updated_at = Utc::now();
    }

    /// Record an auxiliary event without advancing `executed_size`.
    pub fn record_event(&mut self, action: &str, detail: impl Into<String>) {
        self.execution_log.push(ExecutionLogEntry {
            at: Utc::now(),
            action: action.to_string(),
            size: Size::ZERO,
            price: None,
            detail: detail.into(),
        });
        self.updated_at = Utc::now();
    }

    /// Record a per-slice failure. The schedule keeps running;
    /// repeated failure is surfaced through `error_count` for an
    /// operator, not auto-cancelled.
    pub fn record_error(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        self.error_count += 1;
        self.last_error = Some(detail.clone());
        self.execution_log.push(ExecutionLogEntry {
            at: Utc::now(),
            action: "error".to_string(),
            size: Size::ZERO,
            price: None,
            detail,
        });
        self.updated_at = Utc::now();
    }

    /// Size-weighted average execution price across slice entries.
    #[must_use]
    pub fn weighted_average_price(&self) -> Option<Price> {
        let mut total_size = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        for entry in &self.execution_log {
            if entry.action != "slice" {
                continue;
            }
            if let Some(price) = entry.price {
                total_size += entry.size.inner();
                total_notional += entry.size.inner() * price.inner();
            }
        }
        if total_size.is_zero() {
            None
        } else {
            Some(Price::new(total_notional / total_size))
        }
    }
}
