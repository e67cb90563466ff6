//! Prometheus metrics and structured logging for the sentinel agent.
//!
//! - Prometheus counters for execution outcomes, dedup skips, bracket
//!   decisions and trigger fires
//! - Structured logging with tracing (JSON in production, pretty in
//!   development)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
