//! Executor agent - serialized trade execution for the swarm
//!
//! Owns a priority queue of entries and exits and processes exactly one
//! item per tick. Critical threat exits are inserted at the head of the
//! queue; otherwise the highest-urgency item is taken first, FIFO within a
//! class. Every outcome, success or failure, is reported to the memory
//! agent.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{info, warn};

use super::framework::{Agent, AgentRole, SwarmRouter};
use super::types::{
    ExecutionPlan, ExecutionReport, SwarmMessage, ThreatAction, ThreatExit, Urgency,
};
use crate::error::Result;
use crate::execution::{
    BuyRequest, ExecutionAction, ExecutionEngine, ExecutionRequest, ExecutionResult,
};
use crate::risk::RiskParameters;

const TICK_INTERVAL_MS: u64 = 1_000;

/// Wallet/token ids stamped on swarm-opened positions
const SWARM_WALLET_ID: &str = "swarm";

/// One unit of queued work
#[derive(Debug, Clone)]
enum WorkItem {
    Enter(ExecutionPlan),
    Exit(ThreatExit),
}

impl WorkItem {
    fn urgency(&self) -> Urgency {
        match self {
            WorkItem::Enter(plan) => plan.urgency,
            WorkItem::Exit(exit) => exit.urgency,
        }
    }

    fn mint(&self) -> &str {
        match self {
            WorkItem::Enter(plan) => &plan.mint_address,
            WorkItem::Exit(exit) => &exit.mint_address,
        }
    }
}

pub struct ExecutorAgent {
    execution: Arc<ExecutionEngine>,
    router: Arc<SwarmRouter>,
    risk: RiskParameters,
    queue: Mutex<VecDeque<WorkItem>>,
}

impl ExecutorAgent {
    pub fn new(
        execution: Arc<ExecutionEngine>,
        router: Arc<SwarmRouter>,
        risk: RiskParameters,
    ) -> Self {
        Self {
            execution,
            router,
            risk,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Critical exits pre-empt everything; the rest queue FIFO and are
    /// selected by urgency at pop time.
    async fn enqueue(&self, item: WorkItem) {
        let mut queue = self.queue.lock().await;
        let critical_exit =
            matches!(&item, WorkItem::Exit(exit) if exit.urgency == Urgency::Critical);
        if critical_exit {
            queue.push_front(item);
        } else {
            queue.push_back(item);
        }
    }

    /// Take the highest-urgency item, FIFO within a class.
    async fn pop_next(&self) -> Option<WorkItem> {
        let mut queue = self.queue.lock().await;
        let best = queue
            .iter()
            .enumerate()
            .max_by_key(|(index, item)| (item.urgency(), std::cmp::Reverse(*index)))?
            .0;
        queue.remove(best)
    }

    async fn report(&self, result: ExecutionResult, mint: &str, is_entry: bool) {
        self.router
            .send(
                AgentRole::Memory,
                SwarmMessage::ExecutionReport(ExecutionReport {
                    result,
                    mint_address: mint.to_string(),
                    is_entry,
                }),
            )
            .await;
    }

    async fn process_entry(&self, plan: ExecutionPlan) {
        if self.execution.is_halted() {
            warn!("Entry for {} dropped: strategy halted", plan.mint_address);
            self.report(
                ExecutionResult::failed("", None, "Strategy halted, entry dropped".to_string()),
                &plan.mint_address,
                true,
            )
            .await;
            return;
        }

        let request = BuyRequest {
            mint_address: plan.mint_address.clone(),
            base_amount: (plan.base_amount * 1e9) as u64,
            max_slippage_bps: plan.max_slippage_bps,
            priority_fee_base: plan.priority_fee_base,
            wallet_id: SWARM_WALLET_ID.to_string(),
            tracked_token_id: SWARM_WALLET_ID.to_string(),
        };

        match self.execution.execute_buy(&request).await {
            Ok((result, position)) => {
                info!(
                    "Swarm entered {} with position {}",
                    plan.mint_address, position.id
                );
                self.report(result, &plan.mint_address, true).await;
            }
            Err(e) => {
                warn!("Swarm entry for {} failed: {}", plan.mint_address, e);
                self.report(
                    ExecutionResult::failed("", None, e.to_string()),
                    &plan.mint_address,
                    true,
                )
                .await;
            }
        }
    }

    async fn process_exit(&self, exit: ThreatExit) {
        let (action, sell_percentage) = match exit.action {
            ThreatAction::FullExit => (ExecutionAction::FullExit, 100.0),
            ThreatAction::PartialExit => {
                (ExecutionAction::PartialSell, exit.sell_percentage.clamp(1.0, 100.0))
            }
            ThreatAction::Hold => return,
        };

        let request = ExecutionRequest {
            position_id: exit.position_id.clone(),
            policy_id: None,
            action,
            sell_percentage,
            max_slippage_bps: self.risk.max_slippage_bps,
            priority_fee_base: self.risk.max_priority_fee_base,
        };

        info!(
            "Threat exit on {} ({:?}): {}",
            exit.position_id, exit.urgency, exit.reasoning
        );
        let result = self.execution.execute(&request).await;
        self.report(result, &exit.mint_address, false).await;
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Executor
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(TICK_INTERVAL_MS)
    }

    async fn tick(&self) -> Result<()> {
        let Some(item) = self.pop_next().await else {
            return Ok(());
        };

        match item {
            WorkItem::Enter(plan) => self.process_entry(plan).await,
            WorkItem::Exit(exit) => self.process_exit(exit).await,
        }
        Ok(())
    }

    async fn on_message(&self, message: SwarmMessage) {
        match message {
            SwarmMessage::ExecutionPlan(plan) => self.enqueue(WorkItem::Enter(plan)).await,
            SwarmMessage::ThreatExit(exit) => self.enqueue(WorkItem::Exit(exit)).await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySource, RpcConfig, WalletConfig};
    use crate::events::EventBus;
    use crate::infra::RpcContext;
    use crate::risk::RiskEngine;
    use crate::state::StateEngine;
    use solana_sdk::signature::Keypair;

    fn risk() -> RiskParameters {
        RiskParameters {
            max_position_size_base: 0.5,
            max_slippage_bps: 2500,
            max_priority_fee_base: 1_000_000,
            execution_cooldown_ms: 5_000,
        }
    }

    fn test_agent() -> ExecutorAgent {
        let keypair = Keypair::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap(),
        )
        .unwrap();
        let (_, path) = file.keep().unwrap();
        let rpc = Arc::new(
            RpcContext::new(
                &RpcConfig {
                    url: "http://127.0.0.1:1".into(),
                    ws_url: "ws://127.0.0.1:1".into(),
                },
                &WalletConfig {
                    key_source: KeySource::KeypairPath(path.to_string_lossy().into()),
                },
            )
            .unwrap(),
        );
        let state = Arc::new(StateEngine::new(None, None));
        let risk_engine = Arc::new(RiskEngine::new(risk(), state.clone()));
        let execution = Arc::new(ExecutionEngine::new(
            rpc,
            state,
            risk_engine,
            None,
            Arc::new(EventBus::new()),
        ));
        ExecutorAgent::new(execution, Arc::new(SwarmRouter::new()), risk())
    }

    fn plan(mint: &str, urgency: Urgency) -> WorkItem {
        WorkItem::Enter(ExecutionPlan {
            id: uuid::Uuid::new_v4().to_string(),
            mint_address: mint.to_string(),
            base_amount: 0.1,
            max_slippage_bps: 500,
            priority_fee_base: 0,
            urgency,
            reasoning: String::new(),
        })
    }

    fn threat(position: &str, urgency: Urgency) -> WorkItem {
        WorkItem::Exit(ThreatExit {
            position_id: position.to_string(),
            mint_address: "mint".to_string(),
            urgency,
            action: ThreatAction::FullExit,
            sell_percentage: 100.0,
            reasoning: String::new(),
        })
    }

    #[tokio::test]
    async fn critical_exit_preempts_existing_queue() {
        let agent = test_agent();
        agent.enqueue(plan("low", Urgency::Low)).await;
        agent.enqueue(plan("medium", Urgency::Medium)).await;
        agent.enqueue(threat("p-critical", Urgency::Critical)).await;

        let first = agent.pop_next().await.unwrap();
        assert!(matches!(
            &first,
            WorkItem::Exit(exit) if exit.urgency == Urgency::Critical
        ));

        // Remaining items keep their relative order by urgency
        let queue = agent.queue.lock().await;
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].mint(), "low");
        assert_eq!(queue[1].mint(), "medium");
    }

    #[tokio::test]
    async fn pop_takes_highest_urgency_fifo_within_class() {
        let agent = test_agent();
        agent.enqueue(plan("a-low", Urgency::Low)).await;
        agent.enqueue(plan("b-med", Urgency::Medium)).await;
        agent.enqueue(plan("c-med", Urgency::Medium)).await;

        assert_eq!(agent.pop_next().await.unwrap().mint(), "b-med");
        assert_eq!(agent.pop_next().await.unwrap().mint(), "c-med");
        assert_eq!(agent.pop_next().await.unwrap().mint(), "a-low");
        assert!(agent.pop_next().await.is_none());
    }
}
