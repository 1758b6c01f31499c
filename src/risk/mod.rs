//! Risk engine - synchronous pre-trade gate
//!
//! Collects every violation rather than short-circuiting, so a rejected
//! request reports the full picture. The only state is the per-position
//! cooldown map, written exclusively by this engine.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

use crate::config::RiskConfig;
use crate::execution::types::{ExecutionAction, ExecutionRequest};
use crate::state::StateEngine;

/// Process-wide risk limits, immutable after start
#[derive(Debug, Clone)]
pub struct RiskParameters {
    /// Maximum entry size per position, in whole base-currency units
    pub max_position_size_base: f64,
    pub max_slippage_bps: u64,
    pub max_priority_fee_base: u64,
    pub execution_cooldown_ms: u64,
}

impl From<&RiskConfig> for RiskParameters {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_position_size_base: config.max_position_size_base,
            max_slippage_bps: config.max_slippage_bps,
            max_priority_fee_base: config.max_priority_fee_base,
            execution_cooldown_ms: config.execution_cooldown_ms,
        }
    }
}

/// One rule breach
#[derive(Debug, Clone, PartialEq)]
pub enum RiskViolation {
    SlippageExceeded { requested: u64, max: u64 },
    PriorityFeeExceeded { requested: u64, max: u64 },
    ExecutionCooldown { remaining_ms: i64 },
    PositionSizeExceeded { size: f64, max: f64 },
    InvalidSellPercentage { requested: f64 },
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::SlippageExceeded { requested, max } => {
                write!(f, "slippage {}bps exceeds max {}bps", requested, max)
            }
            RiskViolation::PriorityFeeExceeded { requested, max } => {
                write!(f, "priority fee {} exceeds max {}", requested, max)
            }
            RiskViolation::ExecutionCooldown { remaining_ms } => {
                write!(f, "execution cooldown active for another {}ms", remaining_ms)
            }
            RiskViolation::PositionSizeExceeded { size, max } => {
                write!(f, "position size {} exceeds max {}", size, max)
            }
            RiskViolation::InvalidSellPercentage { requested } => {
                write!(f, "sell percentage {} outside (0,100]", requested)
            }
        }
    }
}

/// Outcome of a risk check
#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    pub approved: bool,
    pub violations: Vec<RiskViolation>,
}

impl RiskCheckResult {
    /// Violations concatenated for the persisted failure message.
    pub fn violation_summary(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Synchronous rule gate
pub struct RiskEngine {
    params: RiskParameters,
    state: Arc<StateEngine>,
    /// position id -> last approved execution, ms since epoch
    last_execution: DashMap<String, i64>,
}

impl RiskEngine {
    pub fn new(params: RiskParameters, state: Arc<StateEngine>) -> Self {
        Self {
            params,
            state,
            last_execution: DashMap::new(),
        }
    }

    pub fn params(&self) -> &RiskParameters {
        &self.params
    }

    /// Run every rule and collect the violations. On approval the cooldown
    /// stamp for the position is updated.
    pub fn evaluate(&self, request: &ExecutionRequest) -> RiskCheckResult {
        let mut violations = Vec::new();
        let now_ms = Utc::now().timestamp_millis();

        if request.max_slippage_bps > self.params.max_slippage_bps {
            violations.push(RiskViolation::SlippageExceeded {
                requested: request.max_slippage_bps,
                max: self.params.max_slippage_bps,
            });
        }

        if request.priority_fee_base > self.params.max_priority_fee_base {
            violations.push(RiskViolation::PriorityFeeExceeded {
                requested: request.priority_fee_base,
                max: self.params.max_priority_fee_base,
            });
        }

        if let Some(last) = self.last_execution.get(&request.position_id) {
            let elapsed = now_ms - *last;
            if elapsed < self.params.execution_cooldown_ms as i64 {
                violations.push(RiskViolation::ExecutionCooldown {
                    remaining_ms: self.params.execution_cooldown_ms as i64 - elapsed,
                });
            }
        }

        // An absent position is not a violation here; the execution engine
        // reports it separately.
        if let Some(position) = self.state.get_position(&request.position_id) {
            if position.entry_amount_base > self.params.max_position_size_base {
                violations.push(RiskViolation::PositionSizeExceeded {
                    size: position.entry_amount_base,
                    max: self.params.max_position_size_base,
                });
            }
        }

        if request.action != ExecutionAction::Halt
            && (request.sell_percentage <= 0.0 || request.sell_percentage > 100.0)
        {
            violations.push(RiskViolation::InvalidSellPercentage {
                requested: request.sell_percentage,
            });
        }

        let approved = violations.is_empty();
        if approved {
            self.last_execution.insert(request.position_id.clone(), now_ms);
        }

        RiskCheckResult {
            approved,
            violations,
        }
    }

    /// Erase the cooldown stamp, used after a rejected execution so future
    /// attempts are not stranded.
    pub fn reset_cooldown(&self, position_id: &str) {
        self.last_execution.remove(position_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RiskParameters {
        RiskParameters {
            max_position_size_base: 0.5,
            max_slippage_bps: 2500,
            max_priority_fee_base: 1_000_000,
            execution_cooldown_ms: 60_000,
        }
    }

    fn request(position_id: &str) -> ExecutionRequest {
        ExecutionRequest {
            position_id: position_id.to_string(),
            policy_id: None,
            action: ExecutionAction::PartialSell,
            sell_percentage: 50.0,
            max_slippage_bps: 1000,
            priority_fee_base: 100_000,
        }
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(params(), Arc::new(StateEngine::new(None, None)))
    }

    #[test]
    fn clean_request_is_approved() {
        let result = engine().evaluate(&request("p1"));
        assert!(result.approved);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn cooldown_allows_exactly_one_approval() {
        let engine = engine();
        let first = engine.evaluate(&request("p1"));
        assert!(first.approved);

        let second = engine.evaluate(&request("p1"));
        assert!(!second.approved);
        assert!(matches!(
            second.violations.as_slice(),
            [RiskViolation::ExecutionCooldown { .. }]
        ));

        // Other positions are unaffected
        assert!(engine.evaluate(&request("p2")).approved);

        // Reset unblocks the position
        engine.reset_cooldown("p1");
        assert!(engine.evaluate(&request("p1")).approved);
    }

    #[test]
    fn all_violations_are_collected() {
        let engine = engine();
        let mut bad = request("p1");
        bad.max_slippage_bps = 9_999;
        bad.priority_fee_base = 2_000_000;
        bad.sell_percentage = 150.0;

        let result = engine.evaluate(&bad);
        assert!(!result.approved);
        assert_eq!(result.violations.len(), 3);
        let summary = result.violation_summary();
        assert!(summary.contains("slippage"));
        assert!(summary.contains("priority fee"));
        assert!(summary.contains("sell percentage"));
    }

    #[test]
    fn rejection_does_not_stamp_cooldown() {
        let engine = engine();
        let mut bad = request("p1");
        bad.sell_percentage = 0.0;
        assert!(!engine.evaluate(&bad).approved);

        // A subsequent valid request is not blocked by cooldown
        assert!(engine.evaluate(&request("p1")).approved);
    }

    #[test]
    fn halt_requests_skip_sell_percentage_rule() {
        let engine = engine();
        let mut halt = request("p1");
        halt.action = ExecutionAction::Halt;
        halt.sell_percentage = 0.0;
        assert!(engine.evaluate(&halt).approved);
    }
}
