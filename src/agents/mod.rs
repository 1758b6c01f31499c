//! Agent swarm - cooperative offensive discovery, analysis, sizing and
//! defense, wired through typed mailboxes.
//!
//! The swarm forms a cycle: scout -> analyst -> strategist -> executor ->
//! memory -> strategist, with the sentinel feeding defensive exits straight
//! to the executor. Each agent owns its private queue; the router is the
//! only shared edge.

pub mod analyst;
pub mod executor;
pub mod framework;
pub mod memory;
pub mod scout;
pub mod sentinel;
pub mod strategist;
pub mod swarm;
pub mod types;

pub use analyst::AnalystAgent;
pub use executor::ExecutorAgent;
pub use framework::{Agent, AgentRole, AgentStatus, SwarmRouter};
pub use memory::MemoryAgent;
pub use scout::ScoutAgent;
pub use sentinel::SentinelAgent;
pub use strategist::StrategistAgent;
pub use swarm::Swarm;
pub use types::{
    DecisionOutcome, ExecutionPlan, ExecutionReport, LaunchSignal, OutcomeFeedback, RiskProfile,
    SwarmMessage, ThreatAction, ThreatExit, TokenAnalysis, Urgency,
};
