//! Analyst agent - launch analysis through the reasoning service
//!
//! Consumes launches from the scout, enriches them with curve state, the
//! deployer's wallet cluster and matching historical patterns, then asks the
//! reasoning service for a conviction verdict. Only positive verdicts reach
//! the strategist.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::framework::{Agent, AgentRole, SwarmRouter};
use super::types::{LaunchSignal, RiskProfile, SwarmMessage, TokenAnalysis};
use crate::error::Result;
use crate::infra::{LlmClient, RpcContext};
use crate::intel::{DeployerProfile, PatternDatabase, WalletGraph};

const TICK_INTERVAL_MS: u64 = 2_000;
const CLUSTER_DEPTH: usize = 2;
const MAX_PATTERNS_IN_PROMPT: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalystVerdict {
    conviction_score: f64,
    risk_profile: RiskProfile,
    recommended_position_size_base: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct AnalystAgent {
    rpc: Arc<RpcContext>,
    graph: Arc<WalletGraph>,
    patterns: Arc<PatternDatabase>,
    llm: Arc<LlmClient>,
    router: Arc<SwarmRouter>,
    queue: Mutex<VecDeque<(LaunchSignal, DeployerProfile)>>,
}

impl AnalystAgent {
    pub fn new(
        rpc: Arc<RpcContext>,
        graph: Arc<WalletGraph>,
        patterns: Arc<PatternDatabase>,
        llm: Arc<LlmClient>,
        router: Arc<SwarmRouter>,
    ) -> Self {
        Self {
            rpc,
            graph,
            patterns,
            llm,
            router,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    async fn analyze(&self, signal: LaunchSignal, profile: DeployerProfile) -> Result<()> {
        let mint_key = signal
            .mint_address
            .parse()
            .map_err(|_| crate::error::Error::Internal("bad mint in launch signal".to_string()))?;
        let curve = self.rpc.fetch_bonding_curve(&mint_key).await?;
        if curve.complete {
            debug!("Curve for {} already complete, skipping", signal.mint_address);
            return Ok(());
        }

        let cluster = self.graph.get_cluster(&signal.deployer, CLUSTER_DEPTH).await?;

        let mut context = HashMap::new();
        context.insert("devScore".to_string(), profile.score);
        context.insert("rugRate".to_string(), profile.rug_rate);
        context.insert("totalLaunches".to_string(), profile.total_launches as f64);
        context.insert("clusterSize".to_string(), cluster.len() as f64);
        let matches = self.patterns.find_matches(&context);

        let pattern_lines: Vec<String> = matches
            .iter()
            .take(MAX_PATTERNS_IN_PROMPT)
            .map(|p| {
                format!(
                    "- {} ({} outcomes, {:.0}% hit rate, avg return {:.1}%)",
                    p.name,
                    p.outcome_count,
                    p.hit_rate() * 100.0,
                    p.avg_return_percent
                )
            })
            .collect();

        let prompt = format!(
            "New token launch on the bonding-curve launchpad.\n\
             Mint: {}\n\
             Deployer: {} (score {:.0}/100, {} launches, rug rate {:.2}, cluster of {} connected wallets)\n\
             Curve reserves: {} virtual base / {} virtual tokens, {} real base / {} real tokens\n\
             Matching historical patterns:\n{}\n\
             Respond with a JSON object: {{\"convictionScore\": 0-100, \"riskProfile\": \
             \"low\"|\"medium\"|\"high\"|\"extreme\", \"recommendedPositionSizeBase\": <base units>, \
             \"reasoning\": \"...\"}}",
            signal.mint_address,
            signal.deployer,
            profile.score,
            profile.total_launches,
            profile.rug_rate,
            cluster.len(),
            curve.virtual_base_reserves,
            curve.virtual_token_reserves,
            curve.real_base_reserves,
            curve.real_token_reserves,
            if pattern_lines.is_empty() {
                "(none)".to_string()
            } else {
                pattern_lines.join("\n")
            },
        );

        let verdict: AnalystVerdict = self
            .llm
            .reason_json(
                "You analyze freshly launched tokens for an autonomous trading node. \
                 Be skeptical; most launches fail. Reply with a single JSON object.",
                &prompt,
            )
            .await?;

        if verdict.conviction_score > 0.0 && verdict.recommended_position_size_base > 0.0 {
            self.router
                .send(
                    AgentRole::Strategist,
                    SwarmMessage::TokenAnalysis(TokenAnalysis {
                        mint_address: signal.mint_address,
                        deployer: signal.deployer,
                        conviction_score: verdict.conviction_score,
                        risk_profile: verdict.risk_profile,
                        recommended_position_size_base: verdict.recommended_position_size_base,
                        cluster_size: cluster.len(),
                        reasoning: verdict.reasoning,
                    }),
                )
                .await;
        } else {
            debug!(
                "Analyst passed on {}: conviction {:.0}, size {}",
                signal.mint_address, verdict.conviction_score, verdict.recommended_position_size_base
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Agent for AnalystAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Analyst
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(TICK_INTERVAL_MS)
    }

    async fn tick(&self) -> Result<()> {
        let Some((signal, profile)) = self.queue.lock().await.pop_front() else {
            return Ok(());
        };

        let mint = signal.mint_address.clone();
        if let Err(e) = self.analyze(signal, profile).await {
            warn!("Analysis of {} failed, dropping: {}", mint, e);
        }
        Ok(())
    }

    async fn on_message(&self, message: SwarmMessage) {
        if let SwarmMessage::NewLaunch { signal, profile } = message {
            self.queue.lock().await.push_back((signal, profile));
        }
    }
}
