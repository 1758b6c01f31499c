//! Policy evaluation
//!
//! `evaluate_policy` is a pure function over one policy and one event; the
//! trigger value always comes from state-engine reads, which are
//! non-suspending. Triggered results are ordered by priority descending with
//! ties broken by insertion order.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{PolicyDefinition, PolicyEvaluationResult, TriggerType};
use crate::error::{Error, Result};
use crate::events::{EventBus, EventHandler, EventKind, InternalEvent};
use crate::infra::Db;
use crate::state::StateEngine;

/// Default dev-sell window when a policy does not set one
const DEFAULT_WINDOW_SECONDS: u64 = 600;

/// Rule store plus the evaluator
pub struct PolicyEngine {
    state: Arc<StateEngine>,
    db: Option<Arc<Db>>,
    policies: RwLock<Vec<PolicyDefinition>>,
}

impl PolicyEngine {
    pub fn new(state: Arc<StateEngine>, db: Option<Arc<Db>>) -> Self {
        Self {
            state,
            db,
            policies: RwLock::new(Vec::new()),
        }
    }

    /// Load active policies from the store and register as a catch-all
    /// subscriber. Must be registered after the state engine.
    pub async fn start(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        if let Some(db) = &self.db {
            let loaded = db.load_active_policies().await?;
            info!("Policy engine: loaded {} active policies", loaded.len());
            *self.policies.write().await = loaded;
        }
        bus.subscribe(self.clone() as Arc<dyn EventHandler>).await;
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Policy engine stopped");
    }

    /// Evaluate one policy against one event. Returns `None` when the policy
    /// does not apply to the event variant.
    pub fn evaluate_policy(
        &self,
        policy: &PolicyDefinition,
        event: &InternalEvent,
    ) -> Option<PolicyEvaluationResult> {
        if !policy.is_active {
            return None;
        }

        let (trigger_value, reason) = match (policy.trigger, &event.kind) {
            (
                TriggerType::DevSellPercentage,
                EventKind::DevWalletSell {
                    mint_address,
                    dev_wallet,
                    ..
                },
            ) => {
                let window_ms =
                    policy.window_seconds.unwrap_or(DEFAULT_WINDOW_SECONDS) as i64 * 1000;
                let value = self.state.get_dev_sell_percentage_in_window(
                    mint_address,
                    dev_wallet,
                    window_ms,
                );
                (
                    value,
                    format!(
                        "dev wallet sold {:.2}% of holdings within {}s",
                        value,
                        window_ms / 1000
                    ),
                )
            }
            (
                TriggerType::DevSellCount,
                EventKind::DevWalletSell {
                    mint_address,
                    dev_wallet,
                    ..
                },
            ) => {
                let count = self
                    .state
                    .get_dev_metrics(mint_address, dev_wallet)
                    .map(|m| m.total_sell_count)
                    .unwrap_or(0);
                (count as f64, format!("dev wallet sold {} times", count))
            }
            (
                TriggerType::LpRemovalPercentage,
                EventKind::LpRemove { pool_address, .. },
            ) => {
                let value = self
                    .state
                    .get_lp_state(pool_address)
                    .map(|lp| lp.total_removed_percentage)
                    .unwrap_or(0.0);
                (
                    value,
                    format!("{:.2}% of pool liquidity removed", value),
                )
            }
            (
                TriggerType::SupplyIncrease,
                EventKind::SupplyChange {
                    change_percentage, ..
                },
            ) => (
                *change_percentage,
                format!("token supply changed by {:.2}%", change_percentage),
            ),
            // No price oracle is integrated; this trigger never fires.
            (TriggerType::PriceDropPercentage, _) => return None,
            // No evaluator wired for these triggers yet.
            (TriggerType::LpRemovalTotal, _) | (TriggerType::WalletOutflow, _) => return None,
            _ => return None,
        };

        Some(PolicyEvaluationResult {
            policy_id: policy.id.clone(),
            triggered: trigger_value >= policy.threshold,
            action: policy.action,
            action_params: policy.action_params.clone(),
            trigger_value,
            threshold: policy.threshold,
            reason,
        })
    }

    /// Evaluate every policy against the event; return the triggered results
    /// sorted by priority descending (stable for insertion-order ties).
    pub async fn evaluate_event(&self, event: &InternalEvent) -> Vec<PolicyEvaluationResult> {
        let policies = self.policies.read().await;

        let mut triggered: Vec<(i32, PolicyEvaluationResult)> = policies
            .iter()
            .filter_map(|policy| {
                self.evaluate_policy(policy, event)
                    .filter(|result| result.triggered)
                    .map(|result| (policy.priority, result))
            })
            .collect();

        triggered.sort_by(|a, b| b.0.cmp(&a.0));
        triggered.into_iter().map(|(_, result)| result).collect()
    }

    /// Look up the definition backing a triggered result.
    pub async fn get_policy(&self, id: &str) -> Option<PolicyDefinition> {
        self.policies.read().await.iter().find(|p| p.id == id).cloned()
    }

    pub async fn list_policies(&self) -> Vec<PolicyDefinition> {
        self.policies.read().await.clone()
    }

    /// Add a policy to the in-memory list. Store persistence is the
    /// caller's responsibility.
    pub async fn add_policy(&self, policy: PolicyDefinition) -> Result<()> {
        policy.validate()?;
        let mut policies = self.policies.write().await;
        if policies.iter().any(|p| p.id == policy.id) {
            return Err(Error::Conflict(format!("policy {} already registered", policy.id)));
        }
        policies.push(policy);
        Ok(())
    }

    /// Remove a policy from the in-memory list.
    pub async fn remove_policy(&self, id: &str) -> Result<PolicyDefinition> {
        let mut policies = self.policies.write().await;
        match policies.iter().position(|p| p.id == id) {
            Some(index) => Ok(policies.remove(index)),
            None => Err(Error::PolicyNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl EventHandler for PolicyEngine {
    fn name(&self) -> &str {
        "policy-engine"
    }

    async fn handle_event(&self, event: &InternalEvent) {
        let triggered = self.evaluate_event(event).await;
        for result in &triggered {
            debug!(
                "Policy {} triggered: {} (value {:.2} >= threshold {:.2})",
                result.policy_id, result.reason, result.trigger_value, result.threshold
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_event;
    use crate::policy::types::{ActionParams, PolicyAction};
    use chrono::Utc;

    fn policy(id: &str, trigger: TriggerType, threshold: f64, priority: i32) -> PolicyDefinition {
        PolicyDefinition {
            id: id.to_string(),
            name: id.to_string(),
            trigger,
            threshold,
            window_blocks: None,
            window_seconds: Some(600),
            action: PolicyAction::ExitPosition,
            action_params: ActionParams::default(),
            priority,
            is_active: true,
            tracked_token_id: None,
        }
    }

    fn dev_sell_event(pct: f64, age_secs: i64) -> InternalEvent {
        let mut event = test_event(EventKind::DevWalletSell {
            mint_address: "mint".to_string(),
            dev_wallet: "dev".to_string(),
            amount_tokens: 1_000,
            percentage_of_holdings: pct,
        });
        event.timestamp_ms = Utc::now().timestamp_millis() - age_secs * 1000;
        event
    }

    async fn engine_with(policies: Vec<PolicyDefinition>) -> (Arc<StateEngine>, PolicyEngine) {
        let state = Arc::new(StateEngine::new(None, None));
        let engine = PolicyEngine::new(state.clone(), None);
        for p in policies {
            engine.add_policy(p).await.unwrap();
        }
        (state, engine)
    }

    #[tokio::test]
    async fn dev_sell_threshold_fires_only_once_window_sum_crosses() {
        let (state, engine) =
            engine_with(vec![policy("p1", TriggerType::DevSellPercentage, 30.0, 10)]).await;

        // Sells at now-700s (outside window) and now-100s
        let old = dev_sell_event(10.0, 700);
        let recent = dev_sell_event(25.0, 100);
        state.handle_event(&old).await;
        state.handle_event(&recent).await;

        // Windowed sum is 25 <= 30: not triggered
        assert!(engine.evaluate_event(&recent).await.is_empty());

        // One more sell pushes the windowed sum to 35
        let last = dev_sell_event(10.0, 50);
        state.handle_event(&last).await;
        let triggered = engine.evaluate_event(&last).await;
        assert_eq!(triggered.len(), 1);
        assert!(triggered[0].trigger_value >= 35.0 - 1e-6);
        assert_eq!(triggered[0].action, PolicyAction::ExitPosition);
    }

    #[tokio::test]
    async fn results_sort_by_priority_then_insertion_order() {
        let (state, engine) = engine_with(vec![
            policy("low", TriggerType::DevSellPercentage, 1.0, 1),
            policy("first-high", TriggerType::DevSellPercentage, 1.0, 9),
            policy("second-high", TriggerType::DevSellPercentage, 1.0, 9),
        ])
        .await;

        let event = dev_sell_event(50.0, 10);
        state.handle_event(&event).await;

        let triggered = engine.evaluate_event(&event).await;
        let ids: Vec<&str> = triggered.iter().map(|r| r.policy_id.as_str()).collect();
        assert_eq!(ids, vec!["first-high", "second-high", "low"]);
    }

    #[tokio::test]
    async fn price_drop_trigger_is_a_stub() {
        let (_state, engine) =
            engine_with(vec![policy("p1", TriggerType::PriceDropPercentage, 5.0, 1)]).await;
        let event = dev_sell_event(90.0, 1);
        assert!(engine.evaluate_event(&event).await.is_empty());
    }

    #[tokio::test]
    async fn supply_increase_reads_event_percentage() {
        let (_state, engine) =
            engine_with(vec![policy("p1", TriggerType::SupplyIncrease, 10.0, 1)]).await;

        let event = test_event(EventKind::SupplyChange {
            mint_address: "mint".to_string(),
            previous_supply: 1_000,
            new_supply: 1_200,
            change_percentage: 20.0,
        });
        let triggered = engine.evaluate_event(&event).await;
        assert_eq!(triggered.len(), 1);
        assert!((triggered[0].trigger_value - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplicate_policy_id_conflicts() {
        let (_state, engine) =
            engine_with(vec![policy("p1", TriggerType::DevSellCount, 3.0, 1)]).await;
        let duplicate = policy("p1", TriggerType::DevSellCount, 5.0, 2);
        assert!(matches!(
            engine.add_policy(duplicate).await,
            Err(Error::Conflict(_))
        ));
        assert!(engine.remove_policy("p1").await.is_ok());
        assert!(engine.remove_policy("p1").await.is_err());
    }
}
