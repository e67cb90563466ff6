//! Trigger supervision for the decision layer.
//!
//! A supervisor polls streaming indicator values and runs a hysteresis
//! state machine per trigger, invoking the registered callback when a
//! threshold is crossed or a near-miss has been stuck long enough. The
//! callback ultimately re-invokes the decision layer; the supervisor
//! itself never touches the exchange.

pub mod error;
pub mod registry;
pub mod spec;
pub mod supervisor;

pub use error::{TriggerError, TriggerResult};
pub use registry::SupervisorRegistry;
pub use spec::{BoxFuture, IndicatorKind, IndicatorProvider, TriggerOp, TriggerSpec};
pub use supervisor::{
    FireEvent, FireReason, SupervisorConfig, SupervisorStats, TriggerCallback, TriggerMachine,
    TriggerState, TriggerStatus, TriggerSupervisor,
};
