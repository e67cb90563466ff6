//! Sentinel trading agent.
//!
//! Wires the engine crates into a per-user registry: batch executor,
//! advanced-order engine, and trigger supervisors, all behind one
//! exchange boundary and one state directory. The decision layer (an
//! LLM behind the `IntentSource` trait) stays external; everything it
//! returns is validated before it can touch the exchange.

pub mod app;
pub mod config;
pub mod error;

pub use app::{DecisionContext, EngineRegistry, IntentSource, UserEngines};
pub use config::{AgentConfig, OperatingMode};
pub use error::{AppError, AppResult};
