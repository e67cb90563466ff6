//! Trigger specifications and the indicator boundary.
//!
//! Indicator computation lives with the analytics collaborators; the
//! supervisor only consumes current values through the
//! `IndicatorProvider` trait.

use std::fmt;
use std::pin::Pin;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TriggerResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Indicator the trigger watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Sma,
    Ema,
    Macd,
    Atr,
    BollingerUpper,
    BollingerLower,
    Volume,
    Price,
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rsi => "rsi",
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Macd => "macd",
            Self::Atr => "atr",
            Self::BollingerUpper => "bollinger_upper",
            Self::BollingerLower => "bollinger_lower",
            Self::Volume => "volume",
            Self::Price => "price",
        };
        write!(f, "{s}")
    }
}

/// Comparison between the indicator value and the threshold.
///
/// The crossing operators compare the previous sample against the
/// current one, so they need two polls before they can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "crosses_above")]
    CrossesAbove,
    #[serde(rename = "crosses_below")]
    CrossesBelow,
}

/// Relative tolerance for the `==` operator. Exact decimal equality on
/// a streaming indicator would effectively never fire.
const EQ_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 9); // 1e-9

impl TriggerOp {
    /// Evaluate the operator for one sample.
    #[must_use]
    pub fn evaluate(&self, previous: Option<Decimal>, current: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Lt => current < threshold,
            Self::Gt => current > threshold,
            Self::Le => current <= threshold,
            Self::Ge => current >= threshold,
            Self::Eq => {
                let tolerance = if threshold.is_zero() {
                    EQ_EPSILON
                } else {
                    threshold.abs() * EQ_EPSILON
                };
                (current - threshold).abs() <= tolerance
            }
            Self::CrossesAbove => {
                previous.is_some_and(|prev| prev < threshold) && current >= threshold
            }
            Self::CrossesBelow => {
                previous.is_some_and(|prev| prev > threshold) && current <= threshold
            }
        }
    }
}

impl fmt::Display for TriggerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::CrossesAbove => "crosses_above",
            Self::CrossesBelow => "crosses_below",
        };
        write!(f, "{s}")
    }
}

/// One trigger condition.
///
/// Immutable once a supervisor is built; replacing a strategy's
/// triggers means replacing the whole supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub id: String,
    pub symbol: String,
    pub indicator: IndicatorKind,
    pub period: u32,
    pub operator: TriggerOp,
    /// Threshold value.
    pub value: Decimal,
    /// Fraction of the threshold defining the near-miss band.
    pub hysteresis: Decimal,
    pub cooldown_minutes: u64,
}

impl TriggerSpec {
    /// Whether a value sits inside the near-miss band around the
    /// threshold without meeting the condition itself.
    #[must_use]
    pub fn is_near(&self, current: Decimal) -> bool {
        let band = (self.value * self.hysteresis).abs();
        if band.is_zero() {
            return false;
        }
        (current - self.value).abs() <= band
    }
}

/// Boundary to the analytics collaborators that compute indicators.
pub trait IndicatorProvider: Send + Sync {
    /// Current value of the indicator a spec watches.
    fn current_value(&self, spec: &TriggerSpec) -> BoxFuture<'_, TriggerResult<Decimal>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(operator: TriggerOp, value: Decimal, hysteresis: Decimal) -> TriggerSpec {
        TriggerSpec {
            id: "t1".to_string(),
            symbol: "BTC".to_string(),
            indicator: IndicatorKind::Rsi,
            period: 14,
            operator,
            value,
            hysteresis,
            cooldown_minutes: 15,
        }
    }

    #[test]
    fn test_comparison_operators() {
        assert!(TriggerOp::Lt.evaluate(None, dec!(29), dec!(30)));
        assert!(!TriggerOp::Lt.evaluate(None, dec!(30), dec!(30)));
        assert!(TriggerOp::Le.evaluate(None, dec!(30), dec!(30)));
        assert!(TriggerOp::Gt.evaluate(None, dec!(71), dec!(70)));
        assert!(TriggerOp::Ge.evaluate(None, dec!(70), dec!(70)));
    }

    #[test]
    fn test_eq_uses_relative_tolerance() {
        assert!(TriggerOp::Eq.evaluate(None, dec!(70), dec!(70)));
        assert!(TriggerOp::Eq.evaluate(None, dec!(70.00000000001), dec!(70)));
        assert!(!TriggerOp::Eq.evaluate(None, dec!(70.1), dec!(70)));
    }

    #[test]
    fn test_crossing_needs_previous_sample() {
        // No history: a crossing cannot be established
        assert!(!TriggerOp::CrossesAbove.evaluate(None, dec!(71), dec!(70)));
        assert!(TriggerOp::CrossesAbove.evaluate(Some(dec!(69)), dec!(71), dec!(70)));
        // Already above: no cross
        assert!(!TriggerOp::CrossesAbove.evaluate(Some(dec!(71)), dec!(72), dec!(70)));

        assert!(TriggerOp::CrossesBelow.evaluate(Some(dec!(31)), dec!(29), dec!(30)));
        assert!(!TriggerOp::CrossesBelow.evaluate(Some(dec!(29)), dec!(28), dec!(30)));
    }

    #[test]
    fn test_near_miss_band() {
        // Threshold 30 with 5% hysteresis: band is 28.5..=31.5
        let s = spec(TriggerOp::Lt, dec!(30), dec!(0.05));
        assert!(s.is_near(dec!(31)));
        assert!(s.is_near(dec!(28.5)));
        assert!(!s.is_near(dec!(32)));
    }

    #[test]
    fn test_zero_hysteresis_never_near() {
        let s = spec(TriggerOp::Lt, dec!(30), Decimal::ZERO);
        assert!(!s.is_near(dec!(30)));
    }

    #[test]
    fn test_operator_serde_symbols() {
        assert_eq!(serde_json::to_string(&TriggerOp::Lt).unwrap(), "\"<\"");
        assert_eq!(
            serde_json::from_str::<TriggerOp>("\"crosses_above\"").unwrap(),
            TriggerOp::CrossesAbove
        );
    }
}
