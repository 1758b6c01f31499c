//! Declarative policy definitions

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a policy watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    DevSellPercentage,
    DevSellCount,
    LpRemovalPercentage,
    LpRemovalTotal,
    SupplyIncrease,
    /// Declared but evaluated as a stub: no price oracle is integrated, so
    /// this trigger never fires.
    PriceDropPercentage,
    WalletOutflow,
}

/// What a triggered policy does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    ExitPosition,
    PartialSell,
    HaltStrategy,
    AlertOnly,
}

/// Optional parameters refining a policy's action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    pub sell_percentage: Option<f64>,
    pub max_slippage_bps: Option<u64>,
    pub priority_fee_base: Option<u64>,
}

/// A declarative defense rule evaluated against every ingested event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinition {
    pub id: String,
    pub name: String,
    pub trigger: TriggerType,
    pub threshold: f64,
    pub window_blocks: Option<u64>,
    pub window_seconds: Option<u64>,
    pub action: PolicyAction,
    #[serde(default)]
    pub action_params: ActionParams,
    pub priority: i32,
    pub is_active: bool,
    /// Restrict the policy to one tracked token; None applies to all
    pub tracked_token_id: Option<String>,
}

impl PolicyDefinition {
    /// Validate the invariants every stored policy must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.threshold <= 0.0 {
            return Err(Error::InvalidPolicy(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if self.action == PolicyAction::PartialSell {
            match self.action_params.sell_percentage {
                Some(pct) if pct > 0.0 && pct <= 100.0 => {}
                other => {
                    return Err(Error::InvalidPolicy(format!(
                        "PARTIAL_SELL requires sellPercentage in (0,100], got {:?}",
                        other
                    )))
                }
            }
        }
        if let Some(bps) = self.action_params.max_slippage_bps {
            if bps == 0 || bps > 10_000 {
                return Err(Error::InvalidPolicy(format!(
                    "maxSlippageBps must be in [1,10000], got {}",
                    bps
                )));
            }
        }
        Ok(())
    }
}

/// Result of evaluating one policy against one event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluationResult {
    pub policy_id: String,
    pub triggered: bool,
    pub action: PolicyAction,
    pub action_params: ActionParams,
    pub trigger_value: f64,
    pub threshold: f64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_policy() -> PolicyDefinition {
        PolicyDefinition {
            id: "pol-1".into(),
            name: "dev dump guard".into(),
            trigger: TriggerType::DevSellPercentage,
            threshold: 30.0,
            window_blocks: None,
            window_seconds: Some(600),
            action: PolicyAction::ExitPosition,
            action_params: ActionParams::default(),
            priority: 10,
            is_active: true,
            tracked_token_id: None,
        }
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let mut policy = base_policy();
        policy.threshold = 0.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn partial_sell_requires_percentage_in_range() {
        let mut policy = base_policy();
        policy.action = PolicyAction::PartialSell;
        assert!(policy.validate().is_err());

        policy.action_params.sell_percentage = Some(150.0);
        assert!(policy.validate().is_err());

        policy.action_params.sell_percentage = Some(50.0);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn trigger_type_uses_screaming_snake_wire_names() {
        let json = serde_json::to_string(&TriggerType::DevSellPercentage).unwrap();
        assert_eq!(json, "\"DEV_SELL_PERCENTAGE\"");
        let back: TriggerType = serde_json::from_str("\"LP_REMOVAL_PERCENTAGE\"").unwrap();
        assert_eq!(back, TriggerType::LpRemovalPercentage);
    }
}
