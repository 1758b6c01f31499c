//! Intelligence stores - deployer reputation, wallet relationship graph,
//! pattern database and the cross-node signal bus.

pub mod deployer;
pub mod graph;
pub mod patterns;
pub mod signals;

pub use deployer::{DeployerProfile, DeployerScoreEngine};
pub use graph::{EdgeType, WalletGraph};
pub use patterns::{Pattern, PatternCondition, PatternDatabase};
pub use signals::{Signal, SignalBus, SignalHandler};
