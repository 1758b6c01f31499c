//! Execution request and result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action requested from the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    FullExit,
    PartialSell,
    Halt,
}

/// A single sell execution request issued by the orchestrator or an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub position_id: String,
    /// Policy that triggered this request, when policy-driven
    pub policy_id: Option<String>,
    pub action: ExecutionAction,
    /// Portion of the balance to sell, in (0,100]
    pub sell_percentage: f64,
    pub max_slippage_bps: u64,
    pub priority_fee_base: u64,
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Simulating,
    Submitted,
    Confirmed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Simulating => write!(f, "simulating"),
            ExecutionStatus::Submitted => write!(f, "submitted"),
            ExecutionStatus::Confirmed => write!(f, "confirmed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Condensed simulation output persisted with the execution row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub success: bool,
    pub error: Option<String>,
    pub compute_units: Option<u64>,
    pub logs: Vec<String>,
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: String,
    pub position_id: String,
    pub policy_id: Option<String>,
    pub status: ExecutionStatus,
    pub tx_signature: Option<String>,
    /// Token units sold (or base units spent for buys), as a decimal string
    pub amount_in: Option<String>,
    /// Base units received (or token units bought), as a decimal string
    pub amount_out: Option<String>,
    pub error_message: Option<String>,
    pub simulation_result: Option<SimulationSummary>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// A failed result with a prefixed error message.
    pub fn failed(position_id: &str, policy_id: Option<&str>, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: position_id.to_string(),
            policy_id: policy_id.map(str::to_string),
            status: ExecutionStatus::Failed,
            tx_signature: None,
            amount_in: None,
            amount_out: None,
            error_message: Some(message),
            simulation_result: None,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_carries_message() {
        let result = ExecutionResult::failed("pos-1", Some("pol-1"), "Risk check failed: x".into());
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.position_id, "pos-1");
        assert!(result.error_message.unwrap().starts_with("Risk check failed:"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
    }
}
