//! Strategist agent - sizing and entry decisions
//!
//! Filters analyses, builds a portfolio context from recent outcomes and
//! asks the reasoning service whether and how large to enter. Position size
//! is capped at the configured maximum and halved on a losing streak.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::framework::{Agent, AgentRole, SwarmRouter};
use super::types::{ExecutionPlan, RiskProfile, SwarmMessage, TokenAnalysis, Urgency};
use crate::error::Result;
use crate::execution::ExecutionEngine;
use crate::infra::LlmClient;
use crate::risk::RiskParameters;
use crate::state::StateEngine;

const TICK_INTERVAL_MS: u64 = 2_000;

/// Analyses below this conviction are discarded without reasoning
const MIN_CONVICTION: f64 = 30.0;

/// Rolling outcome window
const OUTCOME_WINDOW: usize = 20;

/// Consecutive losses that constitute a losing streak
const LOSING_STREAK_LEN: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StrategistVerdict {
    action: String,
    #[serde(default)]
    base_amount: f64,
    #[serde(default)]
    max_slippage_bps: u64,
    #[serde(default)]
    reasoning: String,
}

pub struct StrategistAgent {
    state: Arc<StateEngine>,
    execution: Arc<ExecutionEngine>,
    llm: Arc<LlmClient>,
    router: Arc<SwarmRouter>,
    risk: RiskParameters,
    queue: Mutex<VecDeque<TokenAnalysis>>,
    outcomes: Mutex<VecDeque<bool>>,
}

impl StrategistAgent {
    pub fn new(
        state: Arc<StateEngine>,
        execution: Arc<ExecutionEngine>,
        llm: Arc<LlmClient>,
        router: Arc<SwarmRouter>,
        risk: RiskParameters,
    ) -> Self {
        Self {
            state,
            execution,
            llm,
            router,
            risk,
            queue: Mutex::new(VecDeque::new()),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    async fn portfolio_context(&self) -> (usize, f64, bool) {
        let open_count = self.state.get_open_positions().len();
        let outcomes = self.outcomes.lock().await;
        let win_rate = if outcomes.is_empty() {
            0.0
        } else {
            outcomes.iter().filter(|w| **w).count() as f64 / outcomes.len() as f64
        };
        let on_losing_streak = outcomes.len() >= LOSING_STREAK_LEN
            && outcomes.iter().rev().take(LOSING_STREAK_LEN).all(|w| !w);
        (open_count, win_rate, on_losing_streak)
    }

    async fn decide(&self, analysis: TokenAnalysis) -> Result<()> {
        if analysis.risk_profile == RiskProfile::Extreme {
            debug!("Skipping {}: extreme risk profile", analysis.mint_address);
            return Ok(());
        }
        if analysis.conviction_score < MIN_CONVICTION {
            debug!(
                "Skipping {}: conviction {:.0} below floor",
                analysis.mint_address, analysis.conviction_score
            );
            return Ok(());
        }
        if self
            .state
            .get_positions_by_mint(&analysis.mint_address)
            .iter()
            .any(|p| p.is_open())
        {
            debug!("Skipping {}: already holding", analysis.mint_address);
            return Ok(());
        }
        if self.execution.is_halted() {
            warn!("Skipping {}: strategy halted", analysis.mint_address);
            return Ok(());
        }

        let (open_count, win_rate, on_losing_streak) = self.portfolio_context().await;

        let prompt = format!(
            "Candidate entry after analysis.\n\
             Mint: {}\n\
             Conviction: {:.0}/100, risk profile {:?}, suggested size {} base units, \
             deployer cluster size {}\n\
             Analyst notes: {}\n\
             Portfolio: {} open positions, win rate {:.0}%, losing streak: {}\n\
             Max position size: {} base units\n\
             Respond with a JSON object: {{\"action\": \"enter\"|\"skip\", \
             \"baseAmount\": <base units>, \"maxSlippageBps\": <1-10000>, \"reasoning\": \"...\"}}",
            analysis.mint_address,
            analysis.conviction_score,
            analysis.risk_profile,
            analysis.recommended_position_size_base,
            analysis.cluster_size,
            analysis.reasoning,
            open_count,
            win_rate * 100.0,
            on_losing_streak,
            self.risk.max_position_size_base,
        );

        let verdict: StrategistVerdict = self
            .llm
            .reason_json(
                "You size entries for an autonomous trading node. Preserve capital first. \
                 Reply with a single JSON object.",
                &prompt,
            )
            .await?;

        if verdict.action != "enter" || verdict.base_amount <= 0.0 {
            debug!("Strategist skipped {}: {}", analysis.mint_address, verdict.reasoning);
            return Ok(());
        }

        let mut base_amount = verdict.base_amount.min(self.risk.max_position_size_base);
        if on_losing_streak {
            base_amount /= 2.0;
            info!("Losing streak active, halving entry to {} base units", base_amount);
        }

        let max_slippage_bps = match verdict.max_slippage_bps {
            0 => self.risk.max_slippage_bps,
            bps => bps.min(self.risk.max_slippage_bps),
        };

        let plan = ExecutionPlan {
            id: uuid::Uuid::new_v4().to_string(),
            mint_address: analysis.mint_address.clone(),
            base_amount,
            max_slippage_bps,
            priority_fee_base: self.risk.max_priority_fee_base,
            urgency: Urgency::Medium,
            reasoning: verdict.reasoning,
        };

        info!(
            "Entry plan for {}: {} base units at {}bps slippage",
            plan.mint_address, plan.base_amount, plan.max_slippage_bps
        );
        self.router
            .send(AgentRole::Executor, SwarmMessage::ExecutionPlan(plan))
            .await;
        Ok(())
    }

    async fn record_outcome(&self, was_correct: bool) {
        let mut outcomes = self.outcomes.lock().await;
        outcomes.push_back(was_correct);
        while outcomes.len() > OUTCOME_WINDOW {
            outcomes.pop_front();
        }
    }
}

#[async_trait]
impl Agent for StrategistAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Strategist
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(TICK_INTERVAL_MS)
    }

    async fn tick(&self) -> Result<()> {
        let Some(analysis) = self.queue.lock().await.pop_front() else {
            return Ok(());
        };
        let mint = analysis.mint_address.clone();
        if let Err(e) = self.decide(analysis).await {
            warn!("Entry decision for {} failed, dropping: {}", mint, e);
        }
        Ok(())
    }

    async fn on_message(&self, message: SwarmMessage) {
        match message {
            SwarmMessage::TokenAnalysis(analysis) => {
                self.queue.lock().await.push_back(analysis);
            }
            SwarmMessage::Outcome(outcome) => {
                debug!(
                    "Outcome for {}: {:.1}% ({})",
                    outcome.mint_address,
                    outcome.pnl_percent,
                    if outcome.was_correct { "win" } else { "loss" }
                );
                self.record_outcome(outcome.was_correct).await;
            }
            _ => {}
        }
    }
}
