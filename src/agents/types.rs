//! Swarm message types
//!
//! The six agents communicate over typed channels; every payload crossing a
//! mailbox is one of these. The taxonomy is closed so receivers match on
//! variants instead of inspecting loose JSON.

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionResult;
use crate::intel::DeployerProfile;

/// Message urgency, ordered so `Critical` ranks highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

/// A newly observed launch, as seen by the scout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSignal {
    pub mint_address: String,
    pub deployer: String,
    pub signature: String,
    pub slot: u64,
    pub observed_at_ms: i64,
}

/// Risk banding assigned by the analyst's reasoning pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Low,
    Medium,
    High,
    Extreme,
}

/// Analyst output forwarded to the strategist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAnalysis {
    pub mint_address: String,
    pub deployer: String,
    pub conviction_score: f64,
    pub risk_profile: RiskProfile,
    /// Suggested entry, in whole base-currency units
    pub recommended_position_size_base: f64,
    pub cluster_size: usize,
    pub reasoning: String,
}

/// Strategist output: a sized entry for the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub mint_address: String,
    /// Entry size in whole base-currency units
    pub base_amount: f64,
    pub max_slippage_bps: u64,
    pub priority_fee_base: u64,
    pub urgency: Urgency,
    pub reasoning: String,
}

/// Defensive exit requested by the sentinel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatExit {
    pub position_id: String,
    pub mint_address: String,
    pub urgency: Urgency,
    pub action: ThreatAction,
    pub sell_percentage: f64,
    pub reasoning: String,
}

/// Action chosen for a detected threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatAction {
    Hold,
    PartialExit,
    FullExit,
}

/// Executor report to the memory agent, success or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    pub mint_address: String,
    /// True for entries, false for exits
    pub is_entry: bool,
}

/// Closed-loop feedback from memory to the strategist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeFeedback {
    pub mint_address: String,
    pub pnl_percent: f64,
    pub was_correct: bool,
}

/// Per-decision record used for learning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub id: String,
    pub position_id: String,
    pub mint_address: String,
    pub is_entry: bool,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub hold_duration_ms: Option<i64>,
    /// Set only once the position closes
    pub was_correct: Option<bool>,
    pub recorded_at_ms: i64,
}

/// Everything that can land in an agent mailbox
#[derive(Debug, Clone)]
pub enum SwarmMessage {
    NewLaunch {
        signal: LaunchSignal,
        profile: DeployerProfile,
    },
    TokenAnalysis(TokenAnalysis),
    ExecutionPlan(ExecutionPlan),
    ThreatExit(ThreatExit),
    ExecutionReport(ExecutionReport),
    Outcome(OutcomeFeedback),
}

impl SwarmMessage {
    /// Wire channel name, used for logging and routing tables.
    pub fn channel(&self) -> &'static str {
        match self {
            SwarmMessage::NewLaunch { .. } => "new-launch",
            SwarmMessage::TokenAnalysis(_) => "token-analysis",
            SwarmMessage::ExecutionPlan(_) => "execution-plan",
            SwarmMessage::ThreatExit(_) => "threat-exit",
            SwarmMessage::ExecutionReport(_) => "execution-result",
            SwarmMessage::Outcome(_) => "outcome",
        }
    }
}
