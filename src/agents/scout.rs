//! Scout agent - offensive launch discovery
//!
//! Scans recent launchpad program signatures, extracts the mint and deployer
//! from each novel transaction, feeds the wallet graph and deployer
//! reputation engine, shares the launch on the signal bus, and forwards
//! promising deployers to the analyst.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{EncodedTransaction, UiMessage};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::framework::{Agent, AgentRole, SwarmRouter};
use super::types::{LaunchSignal, SwarmMessage};
use crate::curve::program::LAUNCHPAD_PROGRAM_ID;
use crate::error::Result;
use crate::infra::RpcContext;
use crate::intel::{DeployerScoreEngine, EdgeType, SignalBus, WalletGraph};

const TICK_INTERVAL_MS: u64 = 3_000;
const SIGNATURE_SCAN_LIMIT: usize = 25;

/// Deployers below this score are recorded but not forwarded
const MIN_FORWARD_SCORE: f64 = 20.0;

/// Signal bus channel carrying launch observations
pub const LAUNCHES_CHANNEL: &str = "launches";

pub struct ScoutAgent {
    rpc: Arc<RpcContext>,
    graph: Arc<WalletGraph>,
    deployers: Arc<DeployerScoreEngine>,
    signals: Option<Arc<SignalBus>>,
    router: Arc<SwarmRouter>,
    seen_signatures: Mutex<HashSet<String>>,
    seen_mints: Mutex<HashSet<String>>,
}

impl ScoutAgent {
    pub fn new(
        rpc: Arc<RpcContext>,
        graph: Arc<WalletGraph>,
        deployers: Arc<DeployerScoreEngine>,
        signals: Option<Arc<SignalBus>>,
        router: Arc<SwarmRouter>,
    ) -> Self {
        Self {
            rpc,
            graph,
            deployers,
            signals,
            router,
            seen_signatures: Mutex::new(HashSet::new()),
            seen_mints: Mutex::new(HashSet::new()),
        }
    }

    async fn process_signature(&self, signature: &str) -> Result<()> {
        let transaction = self.rpc.get_transaction(signature).await?;
        let slot = transaction.slot;

        let Some((mint, deployer)) = extract_launch(&transaction) else {
            return Ok(());
        };

        {
            let mut seen = self.seen_mints.lock().await;
            if !seen.insert(mint.clone()) {
                return Ok(());
            }
        }

        // A launch without a curve account is noise.
        let mint_key = match mint.parse() {
            Ok(key) => key,
            Err(_) => return Ok(()),
        };
        if !self.rpc.bonding_curve_exists(&mint_key).await.unwrap_or(false) {
            debug!("Mint {} has no bonding curve account, skipping", mint);
            return Ok(());
        }

        self.graph
            .add_edge(&deployer, &mint, EdgeType::DeployedFrom)
            .await?;
        let profile = self.deployers.record_launch(&deployer, &mint, &[]).await?;

        let signal = LaunchSignal {
            mint_address: mint.clone(),
            deployer: deployer.clone(),
            signature: signature.to_string(),
            slot,
            observed_at_ms: Utc::now().timestamp_millis(),
        };

        if let Some(signals) = &self.signals {
            if let Err(e) = signals
                .publish(
                    LAUNCHES_CHANNEL,
                    "new_launch",
                    json!({
                        "mint": mint,
                        "deployer": deployer,
                        "score": profile.score,
                        "slot": slot,
                    }),
                )
                .await
            {
                warn!("Failed to share launch signal: {}", e);
            }
        }

        if profile.score >= MIN_FORWARD_SCORE {
            self.router
                .send(
                    AgentRole::Analyst,
                    SwarmMessage::NewLaunch { signal, profile },
                )
                .await;
        } else {
            debug!(
                "Deployer {} score {} below forwarding floor",
                deployer, profile.score
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Agent for ScoutAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Scout
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(TICK_INTERVAL_MS)
    }

    async fn tick(&self) -> Result<()> {
        let signatures = self
            .rpc
            .signatures_for_address(&LAUNCHPAD_PROGRAM_ID, SIGNATURE_SCAN_LIMIT)
            .await?;

        let novel: Vec<String> = {
            let mut seen = self.seen_signatures.lock().await;
            signatures
                .into_iter()
                .filter(|s| seen.insert(s.clone()))
                .collect()
        };

        for signature in novel {
            if let Err(e) = self.process_signature(&signature).await {
                debug!("Scout skipped {}: {}", signature, e);
            }
        }
        Ok(())
    }

    async fn on_message(&self, _message: SwarmMessage) {}
}

/// Pull `(mint, deployer)` out of a parsed launch transaction: the mint is
/// the first post token balance, the deployer the first signer.
fn extract_launch(
    transaction: &solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta,
) -> Option<(String, String)> {
    let meta = transaction.transaction.meta.as_ref()?;
    let mint = match &meta.post_token_balances {
        OptionSerializer::Some(balances) => balances.first()?.mint.clone(),
        _ => return None,
    };

    let deployer = match &transaction.transaction.transaction {
        EncodedTransaction::Json(ui) => match &ui.message {
            UiMessage::Parsed(parsed) => parsed
                .account_keys
                .iter()
                .find(|key| key.signer)
                .map(|key| key.pubkey.clone())?,
            _ => return None,
        },
        _ => return None,
    };

    Some((mint, deployer))
}
