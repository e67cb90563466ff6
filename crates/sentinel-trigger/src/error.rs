//! Error types for sentinel-trigger.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Indicator unavailable: {0}")]
    IndicatorUnavailable(String),

    #[error("Non-finite indicator value for {0}")]
    NonFiniteValue(String),
}

pub type TriggerResult<T> = Result<T, TriggerError>;
