//! Execution engine
//!
//! Orchestrates one trade end to end: risk gate, quote, instruction build,
//! simulation, send with retries, then the atomic in-memory and store
//! update. Only transient RPC failures are retried; every other failure is
//! persisted once with a distinct message prefix.

use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use super::types::{
    ExecutionAction, ExecutionRequest, ExecutionResult, ExecutionStatus, SimulationSummary,
};
use crate::curve::instruction::{build_buy, build_create_ata, build_sell, compute_budget_prelude, TradeAccounts};
use crate::curve::{apply_slippage, buy_quote, sell_quote, Side};
use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind, InternalEvent};
use crate::infra::{Db, RpcContext};
use crate::risk::RiskEngine;
use crate::state::{PositionState, PositionStatus, PositionUpdate, StateEngine};

/// Send attempts before giving up
const MAX_RETRIES: u32 = 3;

/// Base backoff delay; attempt n waits `BASE_DELAY_MS * 2^n`
const BASE_DELAY_MS: u64 = 1_000;

/// A buy request from the HTTP boundary or the executor agent
#[derive(Debug, Clone)]
pub struct BuyRequest {
    pub mint_address: String,
    /// Base currency to spend, in integer sub-units
    pub base_amount: u64,
    pub max_slippage_bps: u64,
    pub priority_fee_base: u64,
    pub wallet_id: String,
    pub tracked_token_id: String,
}

/// Trade executor
pub struct ExecutionEngine {
    rpc: Arc<RpcContext>,
    state: Arc<StateEngine>,
    risk: Arc<RiskEngine>,
    db: Option<Arc<Db>>,
    bus: Arc<EventBus>,
    halted: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(
        rpc: Arc<RpcContext>,
        state: Arc<StateEngine>,
        risk: Arc<RiskEngine>,
        db: Option<Arc<Db>>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            rpc,
            state,
            risk,
            db,
            bus,
            halted: AtomicBool::new(false),
        }
    }

    /// Whether a halt policy has fired; new entries check this.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Execute one sell request. Never returns Err: every failure mode is
    /// converted into a persisted `Failed` result.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let result = match self.try_execute(request).await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution failed for {}: {}", request.position_id, e);
                // A failed attempt must not strand the position behind its
                // cooldown stamp.
                self.risk.reset_cooldown(&request.position_id);
                ExecutionResult::failed(
                    &request.position_id,
                    request.policy_id.as_deref(),
                    e.to_string(),
                )
            }
        };

        self.persist_result(&result).await;
        result
    }

    async fn try_execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        // 1. Risk gate
        let risk_result = self.risk.evaluate(request);
        if !risk_result.approved {
            return Ok(ExecutionResult::failed(
                &request.position_id,
                request.policy_id.as_deref(),
                format!("Risk check failed: {}", risk_result.violation_summary()),
            ));
        }

        // Halt requests stop new entries without touching the chain.
        if request.action == ExecutionAction::Halt {
            self.halted.store(true, Ordering::SeqCst);
            warn!("Strategy halted by policy {:?}", request.policy_id);
            return Ok(ExecutionResult {
                id: uuid::Uuid::new_v4().to_string(),
                position_id: request.position_id.clone(),
                policy_id: request.policy_id.clone(),
                status: ExecutionStatus::Confirmed,
                tx_signature: None,
                amount_in: None,
                amount_out: None,
                error_message: None,
                simulation_result: None,
                completed_at: Utc::now(),
            });
        }

        // 2. Position lookup
        let Some(position) = self.state.get_position(&request.position_id) else {
            self.risk.reset_cooldown(&request.position_id);
            return Ok(ExecutionResult::failed(
                &request.position_id,
                request.policy_id.as_deref(),
                format!("Position not found: {}", request.position_id),
            ));
        };

        // 3. Sell amount from the integer percentage
        let sell_amount = sell_amount_for_percentage(position.token_balance, request.sell_percentage);
        if sell_amount == 0 {
            self.risk.reset_cooldown(&request.position_id);
            return Ok(ExecutionResult::failed(
                &request.position_id,
                request.policy_id.as_deref(),
                "Nothing to sell: computed amount is zero".to_string(),
            ));
        }

        // 4. Quote and slippage guard
        let mint = Pubkey::from_str(&position.mint_address)
            .map_err(|e| Error::TransactionBuild(format!("invalid mint: {}", e)))?;
        let curve = self.rpc.fetch_bonding_curve(&mint).await?;
        let quote = sell_quote(&curve, sell_amount)?;
        let min_base_output = apply_slippage(quote.amount_out, request.max_slippage_bps, Side::Sell);

        // 5. Instruction list
        let payer = self.rpc.payer();
        let accounts = TradeAccounts::resolve(&mint, &payer, &curve.creator);
        let mut instructions = compute_budget_prelude(request.priority_fee_base);
        instructions.push(build_sell(&accounts, &payer, sell_amount, min_base_output));

        // 6. Simulate before spending a send
        let keypair = self.rpc.keypair();
        let (blockhash, _) = self.rpc.latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            &instructions,
            Some(&payer),
            &[keypair.as_ref()],
            blockhash,
        );

        let simulation = self.rpc.simulate(&transaction).await?;
        if !simulation.success {
            self.risk.reset_cooldown(&request.position_id);
            let mut result = ExecutionResult::failed(
                &request.position_id,
                request.policy_id.as_deref(),
                format!(
                    "Simulation failed: {}",
                    simulation.error.clone().unwrap_or_else(|| "unknown".to_string())
                ),
            );
            result.simulation_result = Some(SimulationSummary {
                success: false,
                error: simulation.error,
                compute_units: simulation.compute_units,
                logs: simulation.logs,
            });
            return Ok(result);
        }

        // 7. Send with retries
        let signature = self
            .send_with_retry(&instructions, false)
            .await
            .map_err(|e| Error::TransactionSend(format!("Send failed after retries: {}", e)))?;

        // 8. Reconcile state and stores
        let new_balance = position.token_balance - sell_amount;
        let closing = new_balance == 0;
        let update = PositionUpdate {
            token_balance: Some(new_balance),
            status: closing.then_some(PositionStatus::Closed),
            closed_at: closing.then(Utc::now),
            ..PositionUpdate::default()
        };
        let updated = self.state.update_position(&request.position_id, update.clone())?;
        if let Some(db) = &self.db {
            if let Err(e) = db.update_position(&request.position_id, &update).await {
                error!("Failed to persist position update: {}", e);
            }
        }

        if closing {
            self.publish_position_closed(&updated).await;
        }

        info!(
            "Sell confirmed for {}: {} tokens -> {} base units ({})",
            request.position_id, sell_amount, quote.amount_out, signature
        );

        Ok(ExecutionResult {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: request.position_id.clone(),
            policy_id: request.policy_id.clone(),
            status: ExecutionStatus::Confirmed,
            tx_signature: Some(signature),
            amount_in: Some(sell_amount.to_string()),
            amount_out: Some(quote.amount_out.to_string()),
            error_message: None,
            simulation_result: Some(SimulationSummary {
                success: true,
                error: None,
                compute_units: simulation.compute_units,
                logs: Vec::new(),
            }),
            completed_at: Utc::now(),
        })
    }

    /// Open a position with a buy. Used by the HTTP boundary and the
    /// executor agent; not policy-gated.
    pub async fn execute_buy(&self, request: &BuyRequest) -> Result<(ExecutionResult, PositionState)> {
        let mint = Pubkey::from_str(&request.mint_address)
            .map_err(|e| Error::TransactionBuild(format!("invalid mint: {}", e)))?;

        let curve = self.rpc.fetch_bonding_curve(&mint).await?;
        let quote = buy_quote(&curve, request.base_amount)?;
        if quote.amount_out == 0 {
            return Err(Error::TransactionBuild("buy quote yielded zero tokens".to_string()));
        }
        let max_base_cost = apply_slippage(request.base_amount, request.max_slippage_bps, Side::Buy);

        let payer = self.rpc.payer();
        let accounts = TradeAccounts::resolve(&mint, &payer, &curve.creator);

        let mut instructions = compute_budget_prelude(request.priority_fee_base);
        if !self.rpc.account_exists(&accounts.user_token_account).await? {
            instructions.push(build_create_ata(&payer, &payer, &mint));
        }
        instructions.push(build_buy(&accounts, &payer, quote.amount_out, max_base_cost));

        let keypair = self.rpc.keypair();
        let (blockhash, _) = self.rpc.latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            &instructions,
            Some(&payer),
            &[keypair.as_ref()],
            blockhash,
        );

        let simulation = self.rpc.simulate(&transaction).await?;
        if !simulation.success {
            return Err(Error::TransactionSimulation(format!(
                "Simulation failed: {}",
                simulation.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        let signature = self.send_with_retry(&instructions, true).await?;

        let entry_amount_base = request.base_amount as f64 / 1e9;
        let position = PositionState {
            id: uuid::Uuid::new_v4().to_string(),
            wallet_id: request.wallet_id.clone(),
            tracked_token_id: request.tracked_token_id.clone(),
            mint_address: request.mint_address.clone(),
            entry_amount_base,
            token_balance: quote.amount_out,
            entry_price: Some(request.base_amount as f64 / quote.amount_out as f64),
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        };

        self.state.add_position(position.clone());
        if let Some(db) = &self.db {
            if let Err(e) = db.insert_position(&position).await {
                error!("Failed to persist opened position: {}", e);
            }
        }

        self.bus
            .publish(InternalEvent {
                id: uuid::Uuid::new_v4().to_string(),
                slot: 0,
                timestamp_ms: Utc::now().timestamp_millis(),
                signature: signature.clone(),
                kind: EventKind::PositionOpened {
                    position_id: position.id.clone(),
                    mint_address: position.mint_address.clone(),
                    wallet_id: position.wallet_id.clone(),
                    entry_amount_base,
                },
            })
            .await;

        info!(
            "Buy confirmed for {}: {} base units -> {} tokens ({})",
            request.mint_address, request.base_amount, quote.amount_out, signature
        );

        let result = ExecutionResult {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            policy_id: None,
            status: ExecutionStatus::Confirmed,
            tx_signature: Some(signature),
            amount_in: Some(request.base_amount.to_string()),
            amount_out: Some(quote.amount_out.to_string()),
            error_message: None,
            simulation_result: None,
            completed_at: Utc::now(),
        };
        self.persist_result(&result).await;

        Ok((result, position))
    }

    /// Exponential-backoff send loop. Every attempt refreshes the blockhash
    /// and re-signs; the RPC send itself carries no retries.
    async fn send_with_retry(
        &self,
        instructions: &[solana_sdk::instruction::Instruction],
        skip_preflight: bool,
    ) -> Result<String> {
        let payer = self.rpc.payer();
        let keypair = self.rpc.keypair();
        let mut last_error = Error::TransactionSend("no attempts made".to_string());

        for attempt in 0..MAX_RETRIES {
            let attempt_result: Result<String> = async {
                let (blockhash, last_valid_block_height) = self.rpc.latest_blockhash().await?;
                let transaction = Transaction::new_signed_with_payer(
                    instructions,
                    Some(&payer),
                    &[keypair.as_ref()],
                    blockhash,
                );
                let signature = self.rpc.send_raw(&transaction, skip_preflight).await?;
                self.rpc.confirm(&signature, last_valid_block_height).await?;
                Ok(signature.to_string())
            }
            .await;

            match attempt_result {
                Ok(signature) => return Ok(signature),
                Err(e) => {
                    last_error = e;
                    if attempt + 1 < MAX_RETRIES {
                        let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                        warn!(
                            "Send attempt {} failed, retrying in {}ms: {}",
                            attempt + 1,
                            delay,
                            last_error
                        );
                        sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn publish_position_closed(&self, position: &PositionState) {
        self.bus
            .publish(InternalEvent {
                id: uuid::Uuid::new_v4().to_string(),
                slot: 0,
                timestamp_ms: Utc::now().timestamp_millis(),
                signature: String::new(),
                kind: EventKind::PositionClosed {
                    position_id: position.id.clone(),
                    mint_address: position.mint_address.clone(),
                },
            })
            .await;
    }

    async fn persist_result(&self, result: &ExecutionResult) {
        if let Some(db) = &self.db {
            if let Err(e) = db.insert_execution(result).await {
                error!("Failed to persist execution {}: {}", result.id, e);
            }
        }
    }
}

/// `balance * floor(pct) / 100`, widened to avoid overflow.
pub fn sell_amount_for_percentage(balance: u64, percentage: f64) -> u64 {
    let whole = percentage.floor().clamp(0.0, 100.0) as u128;
    ((balance as u128 * whole) / 100) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySource, RpcConfig, WalletConfig};
    use crate::risk::{RiskEngine, RiskParameters};
    use solana_sdk::signature::Keypair;

    fn test_rpc() -> Arc<RpcContext> {
        let keypair = Keypair::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap(),
        )
        .unwrap();
        let (_, path) = file.keep().unwrap();
        Arc::new(
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
        )
    }

    fn test_engine() -> (ExecutionEngine, Arc<StateEngine>) {
        let state = Arc::new(StateEngine::new(None, None));
        let risk = Arc::new(RiskEngine::new(
            RiskParameters {
                max_position_size_base: 0.5,
                max_slippage_bps: 2500,
                max_priority_fee_base: 1_000_000,
                execution_cooldown_ms: 5_000,
            },
            state.clone(),
        ));
        let engine = ExecutionEngine::new(
            test_rpc(),
            state.clone(),
            risk,
            None,
            Arc::new(EventBus::new()),
        );
        (engine, state)
    }

    #[test]
    fn sell_amount_uses_integer_percentage() {
        assert_eq!(sell_amount_for_percentage(1_000, 50.0), 500);
        assert_eq!(sell_amount_for_percentage(1_000, 50.9), 500);
        assert_eq!(sell_amount_for_percentage(1_000, 100.0), 1_000);
        assert_eq!(sell_amount_for_percentage(u64::MAX, 100.0), u64::MAX);
        assert_eq!(sell_amount_for_percentage(1_000, 0.4), 0);
    }

    #[tokio::test]
    async fn risk_rejection_persists_failed_with_prefix() {
        let (engine, _state) = test_engine();
        let request = ExecutionRequest {
            position_id: "p1".into(),
            policy_id: Some("pol-1".into()),
            action: ExecutionAction::PartialSell,
            sell_percentage: 50.0,
            max_slippage_bps: 99_999,
            priority_fee_base: 0,
        };

        let result = engine.execute(&request).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result
            .error_message
            .unwrap()
            .starts_with("Risk check failed:"));
    }

    #[tokio::test]
    async fn missing_position_persists_failed_with_prefix() {
        let (engine, _state) = test_engine();
        let request = ExecutionRequest {
            position_id: "ghost".into(),
            policy_id: None,
            action: ExecutionAction::FullExit,
            sell_percentage: 100.0,
            max_slippage_bps: 1_000,
            priority_fee_base: 0,
        };

        let result = engine.execute(&request).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result
            .error_message
            .unwrap()
            .starts_with("Position not found:"));
    }

    #[tokio::test]
    async fn halt_sets_the_flag_without_touching_the_chain() {
        let (engine, _state) = test_engine();
        assert!(!engine.is_halted());

        let request = ExecutionRequest {
            position_id: "p1".into(),
            policy_id: Some("halt-policy".into()),
            action: ExecutionAction::Halt,
            sell_percentage: 0.0,
            max_slippage_bps: 1_000,
            priority_fee_base: 0,
        };
        let result = engine.execute(&request).await;
        assert_eq!(result.status, ExecutionStatus::Confirmed);
        assert!(engine.is_halted());
    }
}
