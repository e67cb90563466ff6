//! Typed exchange boundary for the sentinel trading agent.
//!
//! The rest of the engine never sees SDK-shaped JSON: everything goes
//! through the [`ExchangeClient`] trait, which returns fully-typed
//! success/error values. The HTTP implementation isolates loose response
//! shapes at this single boundary.

pub mod client;
pub mod error;
pub mod http;
pub mod metadata;
pub mod mock;

pub use client::{BoxFuture, BracketOutcome, DynExchangeClient, ExchangeClient, OrderOutcome};
pub use error::{ExchangeError, ExchangeResult};
pub use http::HttpExchangeClient;
pub use metadata::MetadataCache;
pub use mock::MockExchange;
