//! Orchestrator - wires triggered policies to execution requests
//!
//! A boolean gate keeps at most one event in flight at the top level.
//! Concurrent arrivals are dropped with a debug log: triggers are
//! threshold-based, so a dropped event re-fires on the next qualifying one.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::{EventBus, EventHandler, InternalEvent};
use crate::execution::{ExecutionAction, ExecutionEngine, ExecutionRequest};
use crate::policy::{PolicyAction, PolicyEngine, PolicyEvaluationResult};
use crate::risk::RiskParameters;
use crate::state::StateEngine;

/// Fallback sell percentage for partial sells without explicit params
const DEFAULT_PARTIAL_SELL_PCT: f64 = 50.0;

pub struct Orchestrator {
    policy: Arc<PolicyEngine>,
    state: Arc<StateEngine>,
    execution: Arc<ExecutionEngine>,
    risk_defaults: RiskParameters,
    processing: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        policy: Arc<PolicyEngine>,
        state: Arc<StateEngine>,
        execution: Arc<ExecutionEngine>,
        risk_defaults: RiskParameters,
    ) -> Self {
        Self {
            policy,
            state,
            execution,
            risk_defaults,
            processing: AtomicBool::new(false),
        }
    }

    /// Register as a catch-all subscriber. Registered after the state and
    /// policy engines so evaluations see fresh telemetry.
    pub async fn start(self: &Arc<Self>, bus: &EventBus) {
        bus.subscribe(self.clone() as Arc<dyn EventHandler>).await;
        info!("Orchestrator started");
    }

    pub async fn stop(&self) {
        info!("Orchestrator stopped");
    }

    /// Try to take the single-flight gate.
    fn try_begin(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish(&self) {
        self.processing.store(false, Ordering::SeqCst);
    }

    /// Map one triggered policy to an execution request for one position.
    /// Returns `None` for alert-only policies.
    fn build_request(
        result: &PolicyEvaluationResult,
        position_id: &str,
        defaults: &RiskParameters,
    ) -> Option<ExecutionRequest> {
        let (action, sell_percentage) = match result.action {
            PolicyAction::ExitPosition => (ExecutionAction::FullExit, 100.0),
            PolicyAction::PartialSell => (
                ExecutionAction::PartialSell,
                result
                    .action_params
                    .sell_percentage
                    .unwrap_or(DEFAULT_PARTIAL_SELL_PCT),
            ),
            PolicyAction::HaltStrategy => (ExecutionAction::Halt, 0.0),
            PolicyAction::AlertOnly => return None,
        };

        Some(ExecutionRequest {
            position_id: position_id.to_string(),
            policy_id: Some(result.policy_id.clone()),
            action,
            sell_percentage,
            max_slippage_bps: result
                .action_params
                .max_slippage_bps
                .unwrap_or(defaults.max_slippage_bps),
            priority_fee_base: result
                .action_params
                .priority_fee_base
                .unwrap_or(defaults.max_priority_fee_base),
        })
    }

    async fn process(&self, event: &InternalEvent) {
        let triggered = self.policy.evaluate_event(event).await;
        if triggered.is_empty() {
            return;
        }

        let Some(mint) = event.mint_address() else {
            debug!("Triggered event {} carries no mint, skipping", event.id);
            return;
        };

        let positions = self.state.get_positions_by_mint(mint);
        if positions.is_empty() {
            debug!("No open positions on {} for triggered policies", mint);
            return;
        }

        for result in &triggered {
            if result.action == PolicyAction::AlertOnly {
                warn!(
                    "ALERT policy {}: {} (value {:.2}, threshold {:.2})",
                    result.policy_id, result.reason, result.trigger_value, result.threshold
                );
                continue;
            }

            // Policies scoped to a tracked token only touch its positions.
            let scope = self
                .policy
                .get_policy(&result.policy_id)
                .await
                .and_then(|p| p.tracked_token_id);

            for position in positions.iter().filter(|p| p.is_open()) {
                if let Some(token_id) = &scope {
                    if &position.tracked_token_id != token_id {
                        continue;
                    }
                }
                let Some(request) = Self::build_request(result, &position.id, &self.risk_defaults)
                else {
                    continue;
                };

                info!(
                    "Policy {} -> {:?} on position {} ({})",
                    result.policy_id, request.action, position.id, result.reason
                );
                let outcome = self.execution.execute(&request).await;
                debug!(
                    "Execution {} for position {} finished with {}",
                    outcome.id, position.id, outcome.status
                );
            }
        }
    }
}

#[async_trait]
impl EventHandler for Orchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn handle_event(&self, event: &InternalEvent) {
        if !self.try_begin() {
            debug!("Orchestrator busy, dropping event {}", event.id);
            return;
        }
        self.process(event).await;
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ActionParams;

    fn defaults() -> RiskParameters {
        RiskParameters {
            max_position_size_base: 0.5,
            max_slippage_bps: 2500,
            max_priority_fee_base: 1_000_000,
            execution_cooldown_ms: 5_000,
        }
    }

    fn evaluation(action: PolicyAction, params: ActionParams) -> PolicyEvaluationResult {
        PolicyEvaluationResult {
            policy_id: "pol-1".into(),
            triggered: true,
            action,
            action_params: params,
            trigger_value: 42.0,
            threshold: 30.0,
            reason: "test".into(),
        }
    }

    #[test]
    fn exit_maps_to_full_exit_at_100() {
        let request = Orchestrator::build_request(
            &evaluation(PolicyAction::ExitPosition, ActionParams::default()),
            "p1",
            &defaults(),
        )
        .unwrap();
        assert_eq!(request.action, ExecutionAction::FullExit);
        assert_eq!(request.sell_percentage, 100.0);
        assert_eq!(request.max_slippage_bps, 2500);
        assert_eq!(request.priority_fee_base, 1_000_000);
    }

    #[test]
    fn partial_sell_defaults_to_half() {
        let request = Orchestrator::build_request(
            &evaluation(PolicyAction::PartialSell, ActionParams::default()),
            "p1",
            &defaults(),
        )
        .unwrap();
        assert_eq!(request.action, ExecutionAction::PartialSell);
        assert_eq!(request.sell_percentage, 50.0);

        let request = Orchestrator::build_request(
            &evaluation(
                PolicyAction::PartialSell,
                ActionParams {
                    sell_percentage: Some(25.0),
                    max_slippage_bps: Some(500),
                    priority_fee_base: Some(10),
                },
            ),
            "p1",
            &defaults(),
        )
        .unwrap();
        assert_eq!(request.sell_percentage, 25.0);
        assert_eq!(request.max_slippage_bps, 500);
        assert_eq!(request.priority_fee_base, 10);
    }

    #[test]
    fn alert_only_builds_no_request() {
        assert!(Orchestrator::build_request(
            &evaluation(PolicyAction::AlertOnly, ActionParams::default()),
            "p1",
            &defaults(),
        )
        .is_none());
    }

    #[test]
    fn single_flight_gate_admits_one_event_at_a_time() {
        use crate::config::{KeySource, RpcConfig, WalletConfig};
        use crate::events::EventBus;
        use crate::infra::RpcContext;
        use crate::risk::RiskEngine;
        use solana_sdk::signature::Keypair;

        let keypair = Keypair::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap(),
        )
        .unwrap();
        let rpc = Arc::new(
            RpcContext::new(
                &RpcConfig {
                    url: "http://127.0.0.1:1".into(),
                    ws_url: "ws://127.0.0.1:1".into(),
                },
                &WalletConfig {
                    key_source: KeySource::KeypairPath(file.path().to_string_lossy().into()),
                },
            )
            .unwrap(),
        );

        let state = Arc::new(StateEngine::new(None, None));
        let risk = Arc::new(RiskEngine::new(defaults(), state.clone()));
        let execution = Arc::new(ExecutionEngine::new(
            rpc,
            state.clone(),
            risk,
            None,
            Arc::new(EventBus::new()),
        ));
        let policy = Arc::new(PolicyEngine::new(state.clone(), None));
        let orchestrator = Orchestrator::new(policy, state, execution, defaults());

        assert!(orchestrator.try_begin());
        // A second event arriving while the first is in flight is refused
        assert!(!orchestrator.try_begin());
        orchestrator.finish();
        assert!(orchestrator.try_begin());
    }

    #[test]
    fn halt_maps_to_halt_action() {
        let request = Orchestrator::build_request(
            &evaluation(PolicyAction::HaltStrategy, ActionParams::default()),
            "p1",
            &defaults(),
        )
        .unwrap();
        assert_eq!(request.action, ExecutionAction::Halt);
        assert_eq!(request.sell_percentage, 0.0);
    }
}
