//! Error types for sentinel-advanced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvancedError {
    #[error("Unknown order: {0}")]
    UnknownOrder(uuid::Uuid),

    #[error("Order is not {expected}: {actual}")]
    WrongStatus { expected: String, actual: String },

    #[error("No market data for {0}")]
    MarketDataUnavailable(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] sentinel_exchange::ExchangeError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sentinel_persistence::PersistenceError),
}

pub type AdvancedResult<T> = Result<T, AdvancedError>;
