//! Exchange boundary error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Exchange API error: {0}")]
    Api(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Market parameter change: {0}")]
    ParamChange(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
