//! Execution engine - risk check, quote, build, simulate, send-with-retry
//! and the atomic state/store reconciliation.

pub mod engine;
pub mod types;

pub use engine::{BuyRequest, ExecutionEngine};
pub use types::{
    ExecutionAction, ExecutionRequest, ExecutionResult, ExecutionStatus, SimulationSummary,
};
