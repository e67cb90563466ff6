//! Long-running advanced order types.
//!
//! Each advanced order is a persisted state machine record driven by a
//! timer task. The timer is only a driver: the schedule is always
//! recomputed from the persisted record (`executed_size`, execution
//! log), never from timer identity, so the process can restart at any
//! point and resume exactly where it left off.

pub mod chase;
pub mod engine;
pub mod error;
pub mod iceberg;
pub mod oco;
pub mod order;
pub mod scaled;
pub mod trailing;
pub mod twap;

pub use engine::AdvancedOrderEngine;
pub use error::{AdvancedError, AdvancedResult};
pub use order::{
    AdvancedOrder, AdvancedOrderType, AdvancedStatus, ExecutionLogEntry, GiveBehavior, OcoLeg,
    OrderParams,
};
