//! Sentinel agent - defensive threat watch over open positions
//!
//! Checks each open position at most once per 10 seconds for developer
//! dumps, curve completion, oversized wallet clusters and rug signals from
//! other nodes. Critical threats exit immediately without consulting the
//! reasoning service; lesser threats are batched into a single reasoning
//! call with a defensive fallback when that call fails.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::framework::{Agent, AgentRole, SwarmRouter};
use super::types::{SwarmMessage, ThreatAction, ThreatExit, Urgency};
use crate::error::Result;
use crate::infra::{LlmClient, RpcContext};
use crate::intel::{Signal, SignalBus, SignalHandler, WalletGraph};
use crate::state::{PositionState, StateEngine};

const TICK_INTERVAL_MS: u64 = 5_000;

/// Minimum spacing between checks of the same position
const PER_POSITION_COOLDOWN_MS: i64 = 10_000;

/// Dev-sell window inspected for threats
const DEV_SELL_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Wallet clusters above this size are suspicious
const CLUSTER_THREAT_SIZE: usize = 10;

/// Signal bus channel carrying rug observations
pub const RUGS_CHANNEL: &str = "rugs";

#[derive(Debug, Clone)]
struct Threat {
    kind: &'static str,
    severity: Urgency,
    detail: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreatVerdict {
    is_threat: bool,
    #[serde(default)]
    action: Option<ThreatAction>,
    #[serde(default)]
    sell_percentage: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

/// Signal-bus listener feeding rugged mints into the sentinel
pub struct RugSignalListener {
    rugged: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl SignalHandler for RugSignalListener {
    fn name(&self) -> &str {
        "sentinel-rug-listener"
    }

    async fn handle(&self, signal: &Signal) -> Result<()> {
        if let Some(mint) = signal.data.get("mint").and_then(|m| m.as_str()) {
            info!("Network rug signal for {}", mint);
            self.rugged.lock().await.insert(mint.to_string());
        }
        Ok(())
    }
}

pub struct SentinelAgent {
    state: Arc<StateEngine>,
    graph: Arc<WalletGraph>,
    rpc: Arc<RpcContext>,
    llm: Arc<LlmClient>,
    signals: Option<Arc<SignalBus>>,
    router: Arc<SwarmRouter>,
    last_check_ms: DashMap<String, i64>,
    rugged_mints: Arc<Mutex<HashSet<String>>>,
}

impl SentinelAgent {
    pub fn new(
        state: Arc<StateEngine>,
        graph: Arc<WalletGraph>,
        rpc: Arc<RpcContext>,
        llm: Arc<LlmClient>,
        signals: Option<Arc<SignalBus>>,
        router: Arc<SwarmRouter>,
    ) -> Self {
        Self {
            state,
            graph,
            rpc,
            llm,
            signals,
            router,
            last_check_ms: DashMap::new(),
            rugged_mints: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Handler to register on the signal bus `rugs` channel.
    pub fn rug_listener(&self) -> Arc<dyn SignalHandler> {
        Arc::new(RugSignalListener {
            rugged: self.rugged_mints.clone(),
        })
    }

    async fn gather_threats(&self, position: &PositionState) -> Vec<Threat> {
        let mut threats = Vec::new();
        let mint = &position.mint_address;

        // Developer selling pressure over the last ten minutes
        let mut worst_pct = 0.0f64;
        let mut worst_wallet = String::new();
        for metrics in self.state.get_dev_metrics_by_mint(mint) {
            let pct = self.state.get_dev_sell_percentage_in_window(
                mint,
                &metrics.dev_wallet,
                DEV_SELL_WINDOW_MS,
            );
            if pct > worst_pct {
                worst_pct = pct;
                worst_wallet = metrics.dev_wallet.clone();
            }
        }
        if worst_pct > 5.0 {
            let severity = if worst_pct > 30.0 {
                Urgency::Critical
            } else if worst_pct > 15.0 {
                Urgency::High
            } else {
                Urgency::Medium
            };
            threats.push(Threat {
                kind: "dev_sell",
                severity,
                detail: format!("dev wallet {} sold {:.1}% in 10m", worst_wallet, worst_pct),
            });
        }

        // Bonding curve completion
        if let Ok(mint_key) = mint.parse() {
            match self.rpc.fetch_bonding_curve(&mint_key).await {
                Ok(curve) if curve.complete => threats.push(Threat {
                    kind: "curve_complete",
                    severity: Urgency::High,
                    detail: "bonding curve completed".to_string(),
                }),
                Ok(_) => {}
                Err(e) => debug!("Curve check for {} failed: {}", mint, e),
            }
        }

        // Oversized dev cluster
        if !worst_wallet.is_empty() {
            if let Ok(cluster) = self.graph.get_cluster(&worst_wallet, 2).await {
                if cluster.len() > CLUSTER_THREAT_SIZE {
                    threats.push(Threat {
                        kind: "wallet_cluster",
                        severity: Urgency::Medium,
                        detail: format!("dev cluster spans {} wallets", cluster.len()),
                    });
                }
            }
        }

        // Rug flagged by another node
        if self.rugged_mints.lock().await.contains(mint) {
            threats.push(Threat {
                kind: "network_rug",
                severity: Urgency::Critical,
                detail: "rug signal received from the network".to_string(),
            });
        }

        threats
    }

    async fn publish_threats(&self, position: &PositionState, threats: &[Threat]) {
        let Some(signals) = &self.signals else { return };
        for threat in threats
            .iter()
            .filter(|t| t.severity >= Urgency::High && t.kind != "network_rug")
        {
            if let Err(e) = signals
                .publish(
                    RUGS_CHANNEL,
                    threat.kind,
                    json!({
                        "mint": position.mint_address,
                        "severity": threat.severity,
                        "detail": threat.detail,
                    }),
                )
                .await
            {
                warn!("Failed to publish threat signal: {}", e);
            }
        }
    }

    async fn send_exit(
        &self,
        position: &PositionState,
        urgency: Urgency,
        action: ThreatAction,
        sell_percentage: f64,
        reasoning: String,
    ) {
        self.router
            .send(
                AgentRole::Executor,
                SwarmMessage::ThreatExit(ThreatExit {
                    position_id: position.id.clone(),
                    mint_address: position.mint_address.clone(),
                    urgency,
                    action,
                    sell_percentage,
                    reasoning,
                }),
            )
            .await;
    }

    async fn check_position(&self, position: &PositionState) -> Result<()> {
        let threats = self.gather_threats(position).await;
        if threats.is_empty() {
            return Ok(());
        }

        self.publish_threats(position, &threats).await;

        // Critical threats exit now; reasoning latency is not acceptable.
        if let Some(critical) = threats.iter().find(|t| t.severity == Urgency::Critical) {
            warn!(
                "CRITICAL threat on {} ({}): {}",
                position.mint_address, critical.kind, critical.detail
            );
            self.send_exit(
                position,
                Urgency::Critical,
                ThreatAction::FullExit,
                100.0,
                critical.detail.clone(),
            )
            .await;
            return Ok(());
        }

        let threat_lines: Vec<String> = threats
            .iter()
            .map(|t| format!("- [{:?}] {}: {}", t.severity, t.kind, t.detail))
            .collect();
        let prompt = format!(
            "Open position under threat review.\n\
             Mint: {}\nToken balance: {}\nDetected threats:\n{}\n\
             Respond with a JSON object: {{\"isThreat\": bool, \"severity\": \
             \"low\"|\"medium\"|\"high\", \"action\": \"hold\"|\"partial_exit\"|\"full_exit\", \
             \"sellPercentage\": 0-100, \"reasoning\": \"...\"}}",
            position.mint_address,
            position.token_balance,
            threat_lines.join("\n"),
        );

        let has_high = threats.iter().any(|t| t.severity >= Urgency::High);
        let verdict: ThreatVerdict = match self
            .llm
            .reason_json(
                "You defend open positions on a bonding-curve launchpad. \
                 When in doubt, reduce exposure. Reply with a single JSON object.",
                &prompt,
            )
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Threat reasoning failed for {}: {}", position.mint_address, e);
                if has_high {
                    // A high-severity threat with no verdict exits in full.
                    self.send_exit(
                        position,
                        Urgency::High,
                        ThreatAction::FullExit,
                        100.0,
                        "reasoning unavailable, defensive exit".to_string(),
                    )
                    .await;
                }
                return Ok(());
            }
        };

        if !verdict.is_threat {
            debug!("Threats on {} judged benign", position.mint_address);
            return Ok(());
        }

        match verdict.action.unwrap_or(ThreatAction::Hold) {
            ThreatAction::Hold => {}
            ThreatAction::PartialExit => {
                let pct = verdict.sell_percentage.unwrap_or(50.0).clamp(1.0, 100.0);
                self.send_exit(
                    position,
                    if has_high { Urgency::High } else { Urgency::Medium },
                    ThreatAction::PartialExit,
                    pct,
                    verdict.reasoning,
                )
                .await;
            }
            ThreatAction::FullExit => {
                self.send_exit(
                    position,
                    if has_high { Urgency::High } else { Urgency::Medium },
                    ThreatAction::FullExit,
                    100.0,
                    verdict.reasoning,
                )
                .await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Agent for SentinelAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Sentinel
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(TICK_INTERVAL_MS)
    }

    async fn tick(&self) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        for position in self.state.get_open_positions() {
            if let Some(last) = self.last_check_ms.get(&position.id) {
                if now_ms - *last < PER_POSITION_COOLDOWN_MS {
                    continue;
                }
            }
            self.last_check_ms.insert(position.id.clone(), now_ms);

            if let Err(e) = self.check_position(&position).await {
                warn!("Threat check for {} failed: {}", position.id, e);
            }
        }
        Ok(())
    }

    async fn on_message(&self, _message: SwarmMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rug_listener_records_mints() {
        let rugged = Arc::new(Mutex::new(HashSet::new()));
        let listener = RugSignalListener {
            rugged: rugged.clone(),
        };

        let signal = Signal {
            id: "s1".into(),
            node_id: "other-node".into(),
            signal_type: "dev_sell".into(),
            data: json!({"mint": "mint-x", "severity": "critical"}),
            timestamp_ms: 0,
        };
        listener.handle(&signal).await.unwrap();
        assert!(rugged.lock().await.contains("mint-x"));

        // Signals without a mint are tolerated
        let empty = Signal {
            id: "s2".into(),
            node_id: "other-node".into(),
            signal_type: "noise".into(),
            data: json!({}),
            timestamp_ms: 0,
        };
        listener.handle(&empty).await.unwrap();
        assert_eq!(rugged.lock().await.len(), 1);
    }
}
