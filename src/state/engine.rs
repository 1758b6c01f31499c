//! In-memory state engine
//!
//! Owns the position index, per-wallet dev-sell telemetry and per-pool LP
//! removal tallies. All other components read through it; only the execution
//! engine holds a write capability for position balances and status.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{
    DevSellRecord, DevWalletMetrics, LPState, LpRemovalRecord, PositionState, PositionUpdate,
    PositionStatus,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, EventHandler, EventKind, InternalEvent};
use crate::infra::{Db, KvStore};

/// KV key for the periodic state snapshot
const SNAPSHOT_KEY: &str = "guardian:state:snapshot";

/// Snapshot cadence and expiry
const SNAPSHOT_INTERVAL_SECS: u64 = 30;
const SNAPSHOT_EXPIRY_SECS: u64 = 300;

/// Authoritative in-memory state
pub struct StateEngine {
    positions: DashMap<String, PositionState>,
    /// mint -> position ids, kept in lockstep with `positions`
    mint_index: DashMap<String, HashSet<String>>,
    dev_metrics: DashMap<(String, String), DevWalletMetrics>,
    lp_states: DashMap<String, LPState>,
    db: Option<Arc<Db>>,
    kv: Option<Arc<KvStore>>,
    shutdown: CancellationToken,
    snapshot_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StateEngine {
    pub fn new(db: Option<Arc<Db>>, kv: Option<Arc<KvStore>>) -> Self {
        Self {
            positions: DashMap::new(),
            mint_index: DashMap::new(),
            dev_metrics: DashMap::new(),
            lp_states: DashMap::new(),
            db,
            kv,
            shutdown: CancellationToken::new(),
            snapshot_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Load open positions, subscribe to defensive events and arm the
    /// snapshot timer. Must be registered on the bus before the policy
    /// engine so evaluations observe up-to-date telemetry.
    pub async fn start(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        if let Some(db) = &self.db {
            let open = db.load_open_positions().await?;
            info!("State engine: loaded {} open positions", open.len());
            for position in open {
                self.index_position(position);
            }
        }

        bus.subscribe(self.clone() as Arc<dyn EventHandler>).await;

        let engine = self.clone();
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(SNAPSHOT_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.snapshot().await {
                            warn!("State snapshot failed: {}", e);
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
        *self.snapshot_task.lock().await = Some(handle);

        Ok(())
    }

    /// Cancel the snapshot timer and flush one final snapshot.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.snapshot_task.lock().await.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.snapshot().await {
            warn!("Final state snapshot failed: {}", e);
        }
        info!("State engine stopped");
    }

    // ── read views ──────────────────────────────────────────────

    pub fn get_position(&self, id: &str) -> Option<PositionState> {
        self.positions.get(id).map(|p| p.clone())
    }

    pub fn get_open_positions(&self) -> Vec<PositionState> {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.clone())
            .collect()
    }

    pub fn get_positions_by_mint(&self, mint: &str) -> Vec<PositionState> {
        match self.mint_index.get(mint) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.positions.get(id).map(|p| p.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_dev_metrics(&self, mint: &str, wallet: &str) -> Option<DevWalletMetrics> {
        self.dev_metrics
            .get(&(mint.to_string(), wallet.to_string()))
            .map(|m| m.clone())
    }

    /// Sum of ring percentages within `window_ms` of now.
    pub fn get_dev_sell_percentage_in_window(
        &self,
        mint: &str,
        wallet: &str,
        window_ms: i64,
    ) -> f64 {
        let now_ms = Utc::now().timestamp_millis();
        self.dev_metrics
            .get(&(mint.to_string(), wallet.to_string()))
            .map(|m| m.sell_percentage_in_window(now_ms, window_ms))
            .unwrap_or(0.0)
    }

    /// All dev-wallet telemetry observed for one mint.
    pub fn get_dev_metrics_by_mint(&self, mint: &str) -> Vec<DevWalletMetrics> {
        self.dev_metrics
            .iter()
            .filter(|m| m.mint_address == mint)
            .map(|m| m.clone())
            .collect()
    }

    pub fn get_lp_state(&self, pool: &str) -> Option<LPState> {
        self.lp_states.get(pool).map(|s| s.clone())
    }

    // ── mutations ───────────────────────────────────────────────

    pub fn add_position(&self, position: PositionState) {
        debug!("State engine: tracking position {}", position.id);
        self.index_position(position);
    }

    /// Apply a partial update. Status never moves backwards; transitioning
    /// to Closed stamps `closed_at` when the caller did not.
    pub fn update_position(&self, id: &str, update: PositionUpdate) -> Result<PositionState> {
        let mut position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_string()))?;

        if let Some(balance) = update.token_balance {
            position.token_balance = balance;
        }
        if let Some(price) = update.entry_price {
            position.entry_price = Some(price);
        }
        if let Some(status) = update.status {
            if status.rank() < position.status.rank() {
                warn!(
                    "Ignoring backwards status transition {} -> {} on {}",
                    position.status, status, id
                );
            } else {
                position.status = status;
                if status == PositionStatus::Closed && position.closed_at.is_none() {
                    position.closed_at = Some(update.closed_at.unwrap_or_else(Utc::now));
                }
            }
        }
        if let Some(closed_at) = update.closed_at {
            if position.closed_at.is_none() {
                position.closed_at = Some(closed_at);
            }
        }

        Ok(position.clone())
    }

    fn index_position(&self, position: PositionState) {
        self.mint_index
            .entry(position.mint_address.clone())
            .or_default()
            .insert(position.id.clone());
        self.positions.insert(position.id.clone(), position);
    }

    // ── snapshot ────────────────────────────────────────────────

    /// Serialize positions and dev metrics under a single KV key.
    pub async fn snapshot(&self) -> Result<()> {
        let Some(kv) = &self.kv else {
            return Ok(());
        };

        let positions: Vec<PositionState> = self.positions.iter().map(|p| p.clone()).collect();
        let metrics: Vec<DevWalletMetrics> = self.dev_metrics.iter().map(|m| m.clone()).collect();

        let payload = serde_json::to_string(&json!({
            "takenAt": Utc::now().timestamp_millis(),
            "positions": positions,
            "devMetrics": metrics,
        }))?;

        kv.set_ex(SNAPSHOT_KEY, &payload, SNAPSHOT_EXPIRY_SECS).await?;
        debug!(
            "State snapshot: {} positions, {} dev metrics",
            positions.len(),
            metrics.len()
        );
        Ok(())
    }

    // ── event handling ──────────────────────────────────────────

    fn on_dev_wallet_sell(&self, event: &InternalEvent, mint: &str, dev_wallet: &str, pct: f64) {
        let key = (mint.to_string(), dev_wallet.to_string());
        let mut metrics = self
            .dev_metrics
            .entry(key)
            .or_insert_with(|| DevWalletMetrics::new(mint.to_string(), dev_wallet.to_string()));
        metrics.record_sell(DevSellRecord {
            timestamp_ms: event.timestamp_ms,
            percentage: pct,
            slot: event.slot,
        });
    }

    fn on_lp_remove(&self, event: &InternalEvent, mint: &str, pool: &str, pct: f64) {
        let mut lp = self
            .lp_states
            .entry(pool.to_string())
            .or_insert_with(|| LPState::new(pool.to_string(), mint.to_string()));
        lp.removals.push(LpRemovalRecord {
            timestamp_ms: event.timestamp_ms,
            percentage: pct,
            slot: event.slot,
        });
        lp.total_removed_percentage += pct;
    }
}

#[async_trait]
impl EventHandler for StateEngine {
    fn name(&self) -> &str {
        "state-engine"
    }

    async fn handle_event(&self, event: &InternalEvent) {
        match &event.kind {
            EventKind::DevWalletSell {
                mint_address,
                dev_wallet,
                percentage_of_holdings,
                ..
            } => self.on_dev_wallet_sell(event, mint_address, dev_wallet, *percentage_of_holdings),
            EventKind::LpRemove {
                mint_address,
                pool_address,
                liquidity_amount,
            } => self.on_lp_remove(event, mint_address, pool_address, *liquidity_amount),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_event;

    fn open_position(id: &str, mint: &str, balance: u64) -> PositionState {
        PositionState {
            id: id.to_string(),
            wallet_id: "w1".to_string(),
            tracked_token_id: "t1".to_string(),
            mint_address: mint.to_string(),
            entry_amount_base: 0.25,
            token_balance: balance,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn positions_are_indexed_by_mint() {
        let engine = StateEngine::new(None, None);
        engine.add_position(open_position("p1", "mint-a", 100));
        engine.add_position(open_position("p2", "mint-a", 200));
        engine.add_position(open_position("p3", "mint-b", 300));

        assert_eq!(engine.get_positions_by_mint("mint-a").len(), 2);
        assert_eq!(engine.get_positions_by_mint("mint-b").len(), 1);
        assert!(engine.get_positions_by_mint("mint-c").is_empty());
        assert_eq!(engine.get_open_positions().len(), 3);
    }

    #[test]
    fn closed_positions_cannot_reopen() {
        let engine = StateEngine::new(None, None);
        engine.add_position(open_position("p1", "mint-a", 100));

        engine
            .update_position(
                "p1",
                PositionUpdate {
                    token_balance: Some(0),
                    status: Some(PositionStatus::Closed),
                    ..PositionUpdate::default()
                },
            )
            .unwrap();

        let closed = engine.get_position("p1").unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.token_balance, 0);
        assert!(closed.closed_at.is_some());

        // Attempting to reopen is ignored
        engine
            .update_position(
                "p1",
                PositionUpdate {
                    status: Some(PositionStatus::Open),
                    ..PositionUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(engine.get_position("p1").unwrap().status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn dev_sells_accumulate_in_window() {
        let engine = StateEngine::new(None, None);
        let now = Utc::now().timestamp_millis();

        for (offset_s, pct) in [(700i64, 10.0f64), (100, 25.0)] {
            let mut event = test_event(EventKind::DevWalletSell {
                mint_address: "mint".to_string(),
                dev_wallet: "dev".to_string(),
                amount_tokens: 1_000,
                percentage_of_holdings: pct,
            });
            event.timestamp_ms = now - offset_s * 1000;
            engine.handle_event(&event).await;
        }

        let windowed = engine.get_dev_sell_percentage_in_window("mint", "dev", 600_000);
        assert!((windowed - 25.0).abs() < 1e-6);

        let metrics = engine.get_dev_metrics("mint", "dev").unwrap();
        assert_eq!(metrics.total_sell_count, 2);
        assert!((metrics.total_sell_percentage - 35.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn lp_removals_are_monotonic() {
        let engine = StateEngine::new(None, None);
        for pct in [10.0, 15.0, 30.0] {
            let event = test_event(EventKind::LpRemove {
                mint_address: "mint".to_string(),
                pool_address: "pool".to_string(),
                liquidity_amount: pct,
            });
            engine.handle_event(&event).await;
        }

        let lp = engine.get_lp_state("pool").unwrap();
        assert_eq!(lp.removals.len(), 3);
        assert!((lp.total_removed_percentage - 55.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn snapshot_without_kv_is_a_noop() {
        let engine = StateEngine::new(None, None);
        engine.add_position(open_position("p1", "mint-a", 100));
        assert!(engine.snapshot().await.is_ok());
    }
}
