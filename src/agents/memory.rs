//! Memory agent - outcome derivation and learning feedback
//!
//! Collects execution reports from the executor, pairs entries with their
//! exits once a position closes, computes P&L, hold duration and a
//! correctness flag, feeds the result back to the strategist, and
//! periodically persists the most recent outcomes with aggregate stats.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::framework::{Agent, AgentRole, SwarmRouter};
use super::types::{DecisionOutcome, ExecutionReport, OutcomeFeedback, SwarmMessage};
use crate::error::Result;
use crate::execution::ExecutionStatus;
use crate::infra::KvStore;
use crate::state::{PositionStatus, StateEngine};

const TICK_INTERVAL_MS: u64 = 10_000;

/// Most recent outcomes kept and persisted
const OUTCOME_RETENTION: usize = 500;

/// Persist every this many ticks
const PERSIST_EVERY_TICKS: u64 = 10;

pub struct MemoryAgent {
    kv: Option<Arc<KvStore>>,
    state: Arc<StateEngine>,
    router: Arc<SwarmRouter>,
    prefix: String,
    inbox: Mutex<Vec<ExecutionReport>>,
    outcomes: Mutex<VecDeque<DecisionOutcome>>,
    ticks: AtomicU64,
}

impl MemoryAgent {
    pub fn new(
        kv: Option<Arc<KvStore>>,
        state: Arc<StateEngine>,
        router: Arc<SwarmRouter>,
        prefix: &str,
    ) -> Self {
        Self {
            kv,
            state,
            router,
            prefix: prefix.to_string(),
            inbox: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
            ticks: AtomicU64::new(0),
        }
    }

    fn outcome_from_report(report: &ExecutionReport) -> DecisionOutcome {
        let amount_in = report
            .result
            .amount_in
            .as_deref()
            .and_then(|a| a.parse::<u64>().ok());
        let amount_out = report
            .result
            .amount_out
            .as_deref()
            .and_then(|a| a.parse::<u64>().ok());

        // Entry: base in, tokens out. Exit: tokens in, base out.
        let price = match (amount_in, amount_out) {
            (Some(base), Some(tokens)) if report.is_entry && tokens > 0 => {
                Some(base as f64 / tokens as f64)
            }
            (Some(tokens), Some(base)) if !report.is_entry && tokens > 0 => {
                Some(base as f64 / tokens as f64)
            }
            _ => None,
        };

        DecisionOutcome {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: report.result.position_id.clone(),
            mint_address: report.mint_address.clone(),
            is_entry: report.is_entry,
            entry_price: report.is_entry.then_some(price).flatten(),
            exit_price: (!report.is_entry).then_some(price).flatten(),
            pnl_percent: None,
            hold_duration_ms: None,
            was_correct: None,
            recorded_at_ms: report.result.completed_at.timestamp_millis(),
        }
    }

    /// Pair a confirmed exit with its entry once the position has closed,
    /// settle P&L on both records, and return the feedback to emit.
    async fn settle_closed_positions(&self) -> Vec<OutcomeFeedback> {
        let mut feedback = Vec::new();
        let mut outcomes = self.outcomes.lock().await;

        let closed_exits: Vec<(String, f64, i64)> = outcomes
            .iter()
            .filter(|o| !o.is_entry && o.pnl_percent.is_none() && o.exit_price.is_some())
            .filter(|o| {
                self.state
                    .get_position(&o.position_id)
                    .map(|p| p.status == PositionStatus::Closed)
                    .unwrap_or(false)
            })
            .map(|o| {
                (
                    o.position_id.clone(),
                    o.exit_price.unwrap_or(0.0),
                    o.recorded_at_ms,
                )
            })
            .collect();

        for (position_id, exit_price, exit_at_ms) in closed_exits {
            let Some(entry) = outcomes
                .iter()
                .find(|o| o.is_entry && o.position_id == position_id && o.entry_price.is_some())
                .cloned()
            else {
                continue;
            };
            let entry_price = entry.entry_price.unwrap_or(0.0);
            if entry_price <= 0.0 {
                continue;
            }

            let pnl_percent = (exit_price - entry_price) / entry_price * 100.0;
            let hold_duration_ms = exit_at_ms - entry.recorded_at_ms;
            let was_correct = pnl_percent > 0.0;

            for outcome in outcomes.iter_mut() {
                if outcome.position_id == position_id && outcome.pnl_percent.is_none() {
                    outcome.pnl_percent = Some(pnl_percent);
                    outcome.hold_duration_ms = Some(hold_duration_ms.max(0));
                    outcome.was_correct = Some(was_correct);
                }
            }

            debug!(
                "Settled {}: {:.1}% over {}ms",
                position_id, pnl_percent, hold_duration_ms
            );
            feedback.push(OutcomeFeedback {
                mint_address: entry.mint_address,
                pnl_percent,
                was_correct,
            });
        }

        feedback
    }

    async fn persist(&self) -> Result<()> {
        let Some(kv) = &self.kv else { return Ok(()) };
        let outcomes = self.outcomes.lock().await;

        let recent: Vec<&DecisionOutcome> = outcomes.iter().collect();
        kv.set_ex(
            &format!("{}:memory:outcomes", self.prefix),
            &serde_json::to_string(&recent)?,
            7 * 24 * 3600,
        )
        .await?;

        let settled: Vec<&DecisionOutcome> =
            outcomes.iter().filter(|o| o.was_correct.is_some()).collect();
        let wins = settled.iter().filter(|o| o.was_correct == Some(true)).count();
        let avg_pnl = if settled.is_empty() {
            0.0
        } else {
            settled.iter().filter_map(|o| o.pnl_percent).sum::<f64>() / settled.len() as f64
        };

        kv.set_ex(
            &format!("{}:memory:stats", self.prefix),
            &serde_json::to_string(&json!({
                "totalOutcomes": outcomes.len(),
                "settled": settled.len(),
                "wins": wins,
                "losses": settled.len() - wins,
                "avgPnlPercent": avg_pnl,
                "updatedAt": Utc::now().timestamp_millis(),
            }))?,
            7 * 24 * 3600,
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Agent for MemoryAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Memory
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(TICK_INTERVAL_MS)
    }

    async fn tick(&self) -> Result<()> {
        let reports: Vec<ExecutionReport> = self.inbox.lock().await.drain(..).collect();

        if !reports.is_empty() {
            let mut outcomes = self.outcomes.lock().await;
            for report in &reports {
                if report.result.status != ExecutionStatus::Confirmed {
                    debug!(
                        "Recording failed {} on {}: {:?}",
                        if report.is_entry { "entry" } else { "exit" },
                        report.mint_address,
                        report.result.error_message
                    );
                }
                outcomes.push_back(Self::outcome_from_report(report));
                while outcomes.len() > OUTCOME_RETENTION {
                    outcomes.pop_front();
                }
            }
        }

        for feedback in self.settle_closed_positions().await {
            self.router
                .send(AgentRole::Strategist, SwarmMessage::Outcome(feedback))
                .await;
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % PERSIST_EVERY_TICKS == 0 {
            if let Err(e) = self.persist().await {
                warn!("Outcome persistence failed: {}", e);
            } else {
                info!("Persisted outcome history at tick {}", tick);
            }
        }

        Ok(())
    }

    async fn on_message(&self, message: SwarmMessage) {
        if let SwarmMessage::ExecutionReport(report) = message {
            self.inbox.lock().await.push(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionResult;
    use crate::state::{PositionState, PositionUpdate};

    fn report(position_id: &str, is_entry: bool, amount_in: u64, amount_out: u64) -> ExecutionReport {
        ExecutionReport {
            result: ExecutionResult {
                id: uuid::Uuid::new_v4().to_string(),
                position_id: position_id.to_string(),
                policy_id: None,
                status: ExecutionStatus::Confirmed,
                tx_signature: Some("sig".into()),
                amount_in: Some(amount_in.to_string()),
                amount_out: Some(amount_out.to_string()),
                error_message: None,
                simulation_result: None,
                completed_at: Utc::now(),
            },
            mint_address: "mint".to_string(),
            is_entry,
        }
    }

    fn agent_with_state() -> (MemoryAgent, Arc<StateEngine>) {
        let state = Arc::new(StateEngine::new(None, None));
        let agent = MemoryAgent::new(None, state.clone(), Arc::new(SwarmRouter::new()), "test");
        (agent, state)
    }

    #[tokio::test]
    async fn entry_and_exit_pair_into_pnl_feedback() {
        let (agent, state) = agent_with_state();

        state.add_position(PositionState {
            id: "p1".into(),
            wallet_id: "w".into(),
            tracked_token_id: "t".into(),
            mint_address: "mint".into(),
            entry_amount_base: 0.1,
            token_balance: 0,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        });
        state
            .update_position(
                "p1",
                PositionUpdate {
                    status: Some(PositionStatus::Closed),
                    ..PositionUpdate::default()
                },
            )
            .unwrap();

        // Entry: 100k base for 1M tokens (price 0.1). Exit: 1M tokens for
        // 150k base (price 0.15) => +50%.
        agent.inbox.lock().await.push(report("p1", true, 100_000, 1_000_000));
        agent.inbox.lock().await.push(report("p1", false, 1_000_000, 150_000));
        agent.tick().await.unwrap();

        let outcomes = agent.outcomes.lock().await;
        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes.iter() {
            assert_eq!(outcome.was_correct, Some(true));
            assert!((outcome.pnl_percent.unwrap() - 50.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn open_positions_are_not_settled() {
        let (agent, state) = agent_with_state();
        state.add_position(PositionState {
            id: "p1".into(),
            wallet_id: "w".into(),
            tracked_token_id: "t".into(),
            mint_address: "mint".into(),
            entry_amount_base: 0.1,
            token_balance: 1_000_000,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        });

        agent.inbox.lock().await.push(report("p1", true, 100_000, 1_000_000));
        agent.inbox.lock().await.push(report("p1", false, 500_000, 60_000));
        agent.tick().await.unwrap();

        let outcomes = agent.outcomes.lock().await;
        assert!(outcomes.iter().all(|o| o.was_correct.is_none()));
    }

    #[tokio::test]
    async fn retention_is_bounded() {
        let (agent, _state) = agent_with_state();
        {
            let mut inbox = agent.inbox.lock().await;
            for i in 0..600 {
                inbox.push(report(&format!("p{}", i), true, 1_000, 1_000));
            }
        }
        agent.tick().await.unwrap();
        assert_eq!(agent.outcomes.lock().await.len(), OUTCOME_RETENTION);
    }
}
