//! State engine - authoritative in-memory snapshot of positions and
//! defensive telemetry (dev-wallet sell windows, LP removal tallies).

pub mod engine;
pub mod types;

pub use engine::StateEngine;
pub use types::{
    DevSellRecord, DevWalletMetrics, LPState, LpRemovalRecord, PositionState, PositionStatus,
    PositionUpdate,
};
