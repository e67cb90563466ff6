//! Core domain types for the sentinel trading agent.
//!
//! This crate provides fundamental types used throughout the engine:
//! - `Price`, `Size`: precision-safe numeric types with tick/step rounding
//! - `TradingIntent`: one desired exchange action from the decision layer
//! - `AssetMetadata`, `MarketContext`: per-symbol exchange constraints and
//!   the market snapshot validation runs against
//! - `Position`: exchange-reported open exposure
//! - Execution request/result types and the reject/skip taxonomy

pub mod decimal;
pub mod error;
pub mod execution;
pub mod intent;
pub mod market;
pub mod position;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use intent::{IntentAction, PositionSide, TradingIntent};
pub use market::{AssetMetadata, MarketContext, MarketData, SymbolContext};
pub use position::Position;

// Execution types
pub use execution::{
    BracketRequest, CancelRequest, ClientOrderId, ExecutionResult, ExecutionSummary,
    LeverageRequest, OpenOrder, OrderKind, OrderRequest, OrderSide, Outcome, RejectReason,
    SkipReason,
};
