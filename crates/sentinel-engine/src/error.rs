//! Engine error types.
//!
//! Validation and safety failures are data (`RejectReason`/`SkipReason`
//! on per-intent results), never errors. These variants cover the
//! infrastructure failures underneath the engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] sentinel_exchange::ExchangeError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sentinel_persistence::PersistenceError),
}

pub type EngineResult<T> = Result<T, EngineError>;
