//! Intent validation.
//!
//! Checks run in a strict order, each producing a typed rejection:
//!
//! 1. Required numeric fields present, positive, parseable -> InvalidInput
//! 2. Leverage >= 1, capped (not rejected) to the asset maximum
//! 3. Notional >= exchange minimum                  -> BelowMinimumNotional
//! 4. Protective orders on the correct side of mark -> WrongDirection
//! 5. Entry price inside the volatility band        -> PriceUnreasonable
//!
//! When market context is missing or degenerate the validator fails
//! closed: the intent is rejected, never passed through unchecked.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sentinel_core::{
    AssetMetadata, IntentAction, MarketContext, Position, PositionSide, Price, RejectReason, Size,
    TradingIntent,
};

/// Validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Minimum order notional in quote currency.
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,
    /// Base width of the entry price band, in percent of mark.
    #[serde(default = "default_base_band_pct")]
    pub base_band_pct: Decimal,
    /// Multiplier applied to realized volatility / ATR when widening the band.
    #[serde(default = "default_vol_band_multiplier")]
    pub vol_band_multiplier: Decimal,
    /// Hard ceiling on the band width, in percent. Never exceeded
    /// regardless of the computed band.
    #[serde(default = "default_hard_ceiling_pct")]
    pub hard_ceiling_pct: Decimal,
    /// Apply the band-edge price to out-of-band entries instead of
    /// rejecting them. Off by default.
    #[serde(default)]
    pub apply_suggested_price: bool,
}

fn default_min_notional() -> Decimal {
    Decimal::from(10)
}

fn default_base_band_pct() -> Decimal {
    Decimal::from(2)
}

fn default_vol_band_multiplier() -> Decimal {
    Decimal::TWO
}

fn default_hard_ceiling_pct() -> Decimal {
    Decimal::from(20)
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_notional: default_min_notional(),
            base_band_pct: default_base_band_pct(),
            vol_band_multiplier: default_vol_band_multiplier(),
            hard_ceiling_pct: default_hard_ceiling_pct(),
            apply_suggested_price: false,
        }
    }
}

/// An intent that passed validation, with parsed numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIntent {
    pub action: IntentAction,
    pub symbol: String,
    pub side: Option<PositionSide>,
    pub size: Size,
    /// Entry price for entries, trigger price for protective orders,
    /// mark price for closes.
    pub price: Price,
    /// Capped to the asset's maximum.
    pub leverage: u32,
    pub order_id: Option<u64>,
}

/// Validation result: either a parsed intent or a structured rejection.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(Box<ValidatedIntent>),
    Rejected(RejectReason),
}

impl Validation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Intent validator.
#[derive(Debug, Clone, Default)]
pub struct IntentValidator {
    config: ValidatorConfig,
}

impl IntentValidator {
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate one intent against current market and position state.
    ///
    /// `position` is the fresh exchange-reported position for the
    /// intent's symbol, if any.
    pub fn validate(
        &self,
        intent: &TradingIntent,
        metadata: &AssetMetadata,
        ctx: &MarketContext,
        position: Option<&Position>,
    ) -> Validation {
        match intent.action {
            IntentAction::Buy | IntentAction::Sell => self.validate_entry(intent, metadata, ctx),
            IntentAction::StopLoss | IntentAction::TakeProfit => {
                self.validate_protective(intent, ctx, position)
            }
            IntentAction::Close => self.validate_close(intent, ctx, position),
            IntentAction::CancelOrder => Self::validate_cancel(intent),
            IntentAction::Hold => Validation::Valid(Box::new(ValidatedIntent {
                action: IntentAction::Hold,
                symbol: intent.symbol.clone(),
                side: intent.side,
                size: Size::ZERO,
                price: Price::ZERO,
                leverage: 1,
                order_id: None,
            })),
        }
    }

    fn validate_entry(
        &self,
        intent: &TradingIntent,
        metadata: &AssetMetadata,
        ctx: &MarketContext,
    ) -> Validation {
        let size = match parse_positive(intent.size.as_deref(), "size") {
            Ok(v) => Size::new(v),
            Err(reason) => return Validation::Rejected(reason),
        };
        let price = match parse_positive(intent.entry_price.as_deref(), "entryPrice") {
            Ok(v) => Price::new(v),
            Err(reason) => return Validation::Rejected(reason),
        };

        // Leverage is capped, never rejected for excess
        let requested = intent.leverage.unwrap_or(1);
        if requested < 1 {
            return Validation::Rejected(RejectReason::InvalidInput {
                field: "leverage".to_string(),
                detail: "must be at least 1".to_string(),
            });
        }
        let leverage = requested.min(metadata.max_leverage);
        if leverage < requested {
            debug!(
                symbol = %intent.symbol,
                requested,
                capped = leverage,
                "Capped leverage to asset maximum"
            );
        }

        if let Some(reason) = self.check_notional(size, price) {
            return Validation::Rejected(reason);
        }

        // Fail closed: no usable mark price means no entry
        let mark = match ctx.mark_price(&intent.symbol) {
            Some(mark) => mark,
            None => return Validation::Rejected(context_unavailable(&intent.symbol)),
        };

        let band_pct = self.band_pct(ctx, &intent.symbol);
        let deviation_pct = match price.pct_from(mark) {
            Some(pct) => pct.abs(),
            None => return Validation::Rejected(context_unavailable(&intent.symbol)),
        };

        let mut price = price;
        if deviation_pct > band_pct {
            let suggested = band_edge(mark, price, band_pct, metadata);
            if self.config.apply_suggested_price {
                warn!(
                    symbol = %intent.symbol,
                    submitted = %price,
                    corrected = %suggested,
                    "Entry price outside band, applying corrected price"
                );
                price = suggested;
            } else {
                return Validation::Rejected(RejectReason::PriceUnreasonable {
                    submitted: price,
                    market: mark,
                    max_deviation_pct: band_pct,
                    suggested: Some(suggested),
                });
            }
        }

        let side = match intent.action {
            IntentAction::Buy => PositionSide::Long,
            _ => PositionSide::Short,
        };

        Validation::Valid(Box::new(ValidatedIntent {
            action: intent.action,
            symbol: intent.symbol.clone(),
            side: Some(side),
            size,
            price,
            leverage,
            order_id: None,
        }))
    }

    fn validate_protective(
        &self,
        intent: &TradingIntent,
        ctx: &MarketContext,
        position: Option<&Position>,
    ) -> Validation {
        let size = match parse_positive(intent.size.as_deref(), "size") {
            Ok(v) => Size::new(v),
            Err(reason) => return Validation::Rejected(reason),
        };
        let trigger = match parse_positive(intent.trigger_price.as_deref(), "triggerPrice") {
            Ok(v) => Price::new(v),
            Err(reason) => return Validation::Rejected(reason),
        };

        let side = match intent.side.or_else(|| position.and_then(Position::side)) {
            Some(side) => side,
            None => {
                return Validation::Rejected(RejectReason::InvalidInput {
                    field: "side".to_string(),
                    detail: "no side given and no open position to infer it from".to_string(),
                })
            }
        };

        if let Some(reason) = self.check_notional(size, trigger) {
            return Validation::Rejected(reason);
        }

        // Fail closed on missing mark; direction cannot be verified
        let mark = match ctx.mark_price(&intent.symbol) {
            Some(mark) => mark,
            None => return Validation::Rejected(context_unavailable(&intent.symbol)),
        };

        // Wrong-side protective orders are rejected outright, never
        // silently flipped.
        let wrong = match (intent.action, side) {
            (IntentAction::StopLoss, PositionSide::Long) => trigger >= mark,
            (IntentAction::StopLoss, PositionSide::Short) => trigger <= mark,
            (IntentAction::TakeProfit, PositionSide::Long) => trigger <= mark,
            (IntentAction::TakeProfit, PositionSide::Short) => trigger >= mark,
            _ => false,
        };
        if wrong {
            return Validation::Rejected(RejectReason::WrongDirection {
                detail: format!(
                    "{} at {trigger} is on the wrong side of mark {mark} for a {side} position",
                    intent.action
                ),
            });
        }

        Validation::Valid(Box::new(ValidatedIntent {
            action: intent.action,
            symbol: intent.symbol.clone(),
            side: Some(side),
            size,
            price: trigger,
            leverage: 1,
            order_id: None,
        }))
    }

    fn validate_close(
        &self,
        intent: &TradingIntent,
        ctx: &MarketContext,
        position: Option<&Position>,
    ) -> Validation {
        let position = match position.filter(|p| p.is_open()) {
            Some(p) => p,
            None => {
                return Validation::Rejected(RejectReason::InvalidInput {
                    field: "symbol".to_string(),
                    detail: format!("{}: no open position to close", intent.symbol),
                })
            }
        };

        // Size defaults to the full position
        let size = match intent.size.as_deref() {
            Some(raw) => match parse_positive(Some(raw), "size") {
                Ok(v) => Size::new(v),
                Err(reason) => return Validation::Rejected(reason),
            },
            None => position.abs_size(),
        };

        let mark = ctx
            .mark_price(&intent.symbol)
            .unwrap_or(position.mark_price);

        Validation::Valid(Box::new(ValidatedIntent {
            action: IntentAction::Close,
            symbol: intent.symbol.clone(),
            side: position.side(),
            size,
            price: mark,
            leverage: 1,
            order_id: None,
        }))
    }

    fn validate_cancel(intent: &TradingIntent) -> Validation {
        match intent.order_id {
            Some(oid) => Validation::Valid(Box::new(ValidatedIntent {
                action: IntentAction::CancelOrder,
                symbol: intent.symbol.clone(),
                side: None,
                size: Size::ZERO,
                price: Price::ZERO,
                leverage: 1,
                order_id: Some(oid),
            })),
            None => Validation::Rejected(RejectReason::InvalidInput {
                field: "orderId".to_string(),
                detail: "required for cancel_order".to_string(),
            }),
        }
    }

    fn check_notional(&self, size: Size, price: Price) -> Option<RejectReason> {
        let notional = size.notional(price);
        if notional < self.config.min_notional {
            Some(RejectReason::BelowMinimumNotional {
                notional,
                minimum: self.config.min_notional,
            })
        } else {
            None
        }
    }

    /// Band width in percent: base widened by observed volatility,
    /// clamped to the hard ceiling.
    fn band_pct(&self, ctx: &MarketContext, symbol: &str) -> Decimal {
        let vol_pct = ctx
            .get(symbol)
            .and_then(|c| match (c.realized_vol_pct, c.atr_pct) {
                (Some(v), Some(a)) => Some(v.max(a)),
                (Some(v), None) => Some(v),
                (None, Some(a)) => Some(a),
                (None, None) => None,
            })
            .filter(|v| v.is_sign_positive())
            .unwrap_or(Decimal::ZERO);

        let band = self.config.base_band_pct + self.config.vol_band_multiplier * vol_pct;
        band.min(self.config.hard_ceiling_pct)
    }
}

fn parse_positive(raw: Option<&str>, field: &str) -> Result<Decimal, RejectReason> {
    let raw = raw.ok_or_else(|| RejectReason::InvalidInput {
        field: field.to_string(),
        detail: "missing".to_string(),
    })?;
    let value: Decimal = raw.parse().map_err(|_| RejectReason::InvalidInput {
        field: field.to_string(),
        detail: format!("'{raw}' is not a number"),
    })?;
    if value <= Decimal::ZERO {
        return Err(RejectReason::InvalidInput {
            field: field.to_string(),
            detail: format!("'{raw}' is not positive"),
        });
    }
    Ok(value)
}

fn context_unavailable(symbol: &str) -> RejectReason {
    RejectReason::ExchangeError {
        detail: format!("{symbol}: market context unavailable, failing closed"),
    }
}

/// Band-edge price on the submitted side of the market, rounded to tick.
fn band_edge(mark: Price, submitted: Price, band_pct: Decimal, metadata: &AssetMetadata) -> Price {
    let offset = mark.inner() * band_pct / Decimal::from(100);
    let edge = if submitted > mark {
        Price::new(mark.inner() + offset)
    } else {
        Price::new(mark.inner() - offset)
    };
    metadata.round_price(edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::SymbolContext;

    fn metadata() -> AssetMetadata {
        AssetMetadata {
            symbol: "BTC".to_string(),
            tick_size: Price::new(dec!(0.5)),
            sz_decimals: 3,
            max_leverage: 20,
        }
    }

    fn context(mark: Decimal) -> MarketContext {
        let mut ctx = MarketContext::new();
        ctx.insert(
            "BTC",
            SymbolContext {
                mark_price: Price::new(mark),
                realized_vol_pct: None,
                atr_pct: None,
            },
        );
        ctx
    }

    fn buy(size: &str, price: &str, leverage: u32) -> TradingIntent {
        TradingIntent {
            action: IntentAction::Buy,
            symbol: "BTC".to_string(),
            side: Some(PositionSide::Long),
            size: Some(size.to_string()),
            leverage: Some(leverage),
            entry_price: Some(price.to_string()),
            trigger_price: None,
            order_id: None,
            reasoning: None,
        }
    }

    fn stop_loss(trigger: &str, side: PositionSide) -> TradingIntent {
        TradingIntent {
            action: IntentAction::StopLoss,
            symbol: "BTC".to_string(),
            side: Some(side),
            size: Some("0.5".to_string()),
            leverage: None,
            entry_price: None,
            trigger_price: Some(trigger.to_string()),
            order_id: None,
            reasoning: None,
        }
    }

    fn long_position() -> Position {
        Position {
            symbol: "BTC".to_string(),
            size: dec!(0.5),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(dec!(60000)),
            liquidation_price: Some(Price::new(dec!(54000))),
            leverage: 10,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_missing_field_names_the_field() {
        let validator = IntentValidator::default();
        let mut intent = buy("0.1", "60000", 5);
        intent.size = None;

        match validator.validate(&intent, &metadata(), &context(dec!(60000)), None) {
            Validation::Rejected(RejectReason::InvalidInput { field, .. }) => {
                assert_eq!(field, "size");
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_field_rejected() {
        let validator = IntentValidator::default();
        let intent = buy("abc", "60000", 5);
        assert!(matches!(
            validator.validate(&intent, &metadata(), &context(dec!(60000)), None),
            Validation::Rejected(RejectReason::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_leverage_capped_not_rejected() {
        let validator = IntentValidator::default();
        let intent = buy("0.1", "60000", 100);
        match validator.validate(&intent, &metadata(), &context(dec!(60000)), None) {
            Validation::Valid(v) => assert_eq!(v.leverage, 20),
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn test_below_minimum_notional() {
        let validator = IntentValidator::default();
        let intent = buy("0.0001", "60000", 5); // $6 notional
        assert!(matches!(
            validator.validate(&intent, &metadata(), &context(dec!(60000)), None),
            Validation::Rejected(RejectReason::BelowMinimumNotional { .. })
        ));
    }

    #[test]
    fn test_stop_above_mark_rejected_for_long() {
        let validator = IntentValidator::default();
        let intent = stop_loss("61000", PositionSide::Long);
        let position = long_position();
        assert!(matches!(
            validator.validate(&intent, &metadata(), &context(dec!(60000)), Some(&position)),
            Validation::Rejected(RejectReason::WrongDirection { .. })
        ));
    }

    #[test]
    fn test_stop_below_mark_valid_for_long() {
        let validator = IntentValidator::default();
        let intent = stop_loss("58000", PositionSide::Long);
        let position = long_position();
        assert!(validator
            .validate(&intent, &metadata(), &context(dec!(60000)), Some(&position))
            .is_valid());
    }

    #[test]
    fn test_short_stop_direction_inverted() {
        let validator = IntentValidator::default();
        // For a short, the stop must sit above mark
        let valid = stop_loss("62000", PositionSide::Short);
        let invalid = stop_loss("58000", PositionSide::Short);
        assert!(validator
            .validate(&valid, &metadata(), &context(dec!(60000)), None)
            .is_valid());
        assert!(matches!(
            validator.validate(&invalid, &metadata(), &context(dec!(60000)), None),
            Validation::Rejected(RejectReason::WrongDirection { .. })
        ));
    }

    #[test]
    fn test_entry_outside_band_rejected_with_suggestion() {
        let validator = IntentValidator::default();
        // Default band is 2% with no volatility data; 10% away
        let intent = buy("0.1", "66000", 5);
        match validator.validate(&intent, &metadata(), &context(dec!(60000)), None) {
            Validation::Rejected(RejectReason::PriceUnreasonable {
                suggested: Some(suggested),
                ..
            }) => {
                // Band edge: 60000 * 1.02 = 61200
                assert_eq!(suggested.0, dec!(61200.0));
            }
            other => panic!("expected PriceUnreasonable, got {other:?}"),
        }
    }

    #[test]
    fn test_band_hard_ceiling_holds_under_extreme_vol() {
        let validator = IntentValidator::default();
        let mut ctx = MarketContext::new();
        ctx.insert(
            "BTC",
            SymbolContext {
                mark_price: Price::new(dec!(60000)),
                realized_vol_pct: Some(dec!(50)), // absurd vol
                atr_pct: None,
            },
        );
        // 25% away from mark; computed band would be 102% without the cap
        let intent = buy("0.1", "75000", 5);
        match validator.validate(&intent, &metadata(), &ctx, None) {
            Validation::Rejected(RejectReason::PriceUnreasonable {
                max_deviation_pct, ..
            }) => {
                assert_eq!(max_deviation_pct, dec!(20));
            }
            other => panic!("expected PriceUnreasonable, got {other:?}"),
        }
    }

    #[test]
    fn test_suggested_price_applied_when_enabled() {
        let validator = IntentValidator::new(ValidatorConfig {
            apply_suggested_price: true,
            ..ValidatorConfig::default()
        });
        let intent = buy("0.1", "66000", 5);
        match validator.validate(&intent, &metadata(), &context(dec!(60000)), None) {
            Validation::Valid(v) => assert_eq!(v.price.0, dec!(61200.0)),
            other => panic!("expected corrected valid, got {other:?}"),
        }
    }

    #[test]
    fn test_fails_closed_without_market_context() {
        let validator = IntentValidator::default();
        let intent = buy("0.1", "60000", 5);
        // Empty context: the symbol cannot be priced
        assert!(matches!(
            validator.validate(&intent, &metadata(), &MarketContext::new(), None),
            Validation::Rejected(RejectReason::ExchangeError { .. })
        ));
    }

    #[test]
    fn test_close_defaults_to_full_position() {
        let validator = IntentValidator::default();
        let intent = TradingIntent {
            action: IntentAction::Close,
            symbol: "BTC".to_string(),
            side: None,
            size: None,
            leverage: None,
            entry_price: None,
            trigger_price: None,
            order_id: None,
            reasoning: None,
        };
        let position = long_position();
        match validator.validate(&intent, &metadata(), &context(dec!(60000)), Some(&position)) {
            Validation::Valid(v) => assert_eq!(v.size.0, dec!(0.5)),
            other => panic!("expected valid close, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_requires_order_id() {
        let validator = IntentValidator::default();
        let intent = TradingIntent {
            action: IntentAction::CancelOrder,
            symbol: "BTC".to_string(),
            side: None,
            size: None,
            leverage: None,
            entry_price: None,
            trigger_price: None,
            order_id: None,
            reasoning: None,
        };
        assert!(matches!(
            validator.validate(&intent, &metadata(), &context(dec!(60000)), None),
            Validation::Rejected(RejectReason::InvalidInput { .. })
        ));
    }
}
