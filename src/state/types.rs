//! Position and telemetry types owned by the state engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::events::u64_string;

/// Maximum entries kept in a dev wallet's recent-sell ring
pub const DEV_SELL_RING_CAPACITY: usize = 100;

/// Position lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    Failed,
}

impl PositionStatus {
    /// Lifecycle rank. Updates may never lower it; a closed position cannot
    /// reopen.
    pub fn rank(&self) -> u8 {
        match self {
            PositionStatus::Open => 0,
            PositionStatus::Closing => 1,
            PositionStatus::Closed | PositionStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::Closing => write!(f, "closing"),
            PositionStatus::Closed => write!(f, "closed"),
            PositionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A position in a launched token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    /// Globally unique position id
    pub id: String,
    /// Owning wallet row id
    pub wallet_id: String,
    /// Tracked token row id
    pub tracked_token_id: String,
    /// Token mint address
    pub mint_address: String,
    /// Base currency committed at entry, in fractional units
    pub entry_amount_base: f64,
    /// Token balance in integer base units
    #[serde(with = "u64_string")]
    pub token_balance: u64,
    /// Entry price, when known
    pub entry_price: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionState {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Partial update applied to a position. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct PositionUpdate {
    pub token_balance: Option<u64>,
    pub entry_price: Option<f64>,
    pub status: Option<PositionStatus>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One recorded dev-wallet sell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevSellRecord {
    pub timestamp_ms: i64,
    pub percentage: f64,
    pub slot: u64,
}

/// Rolling sell telemetry for one `(mint, dev wallet)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevWalletMetrics {
    pub mint_address: String,
    pub dev_wallet: String,
    /// Monotonic count of all observed sells
    pub total_sell_count: u64,
    /// Monotonic cumulative percentage; evicted ring entries stay counted
    pub total_sell_percentage: f64,
    /// Ring of the most recent sells, oldest first
    pub recent_sells: VecDeque<DevSellRecord>,
    pub last_updated: DateTime<Utc>,
}

impl DevWalletMetrics {
    pub fn new(mint_address: String, dev_wallet: String) -> Self {
        Self {
            mint_address,
            dev_wallet,
            total_sell_count: 0,
            total_sell_percentage: 0.0,
            recent_sells: VecDeque::with_capacity(DEV_SELL_RING_CAPACITY),
            last_updated: Utc::now(),
        }
    }

    /// Record one sell, evicting the oldest ring entry at capacity.
    pub fn record_sell(&mut self, record: DevSellRecord) {
        if self.recent_sells.len() >= DEV_SELL_RING_CAPACITY {
            self.recent_sells.pop_front();
        }
        self.total_sell_count += 1;
        self.total_sell_percentage += record.percentage;
        self.recent_sells.push_back(record);
        self.last_updated = Utc::now();
    }

    /// Sum of ring percentages with `timestamp >= now - window_ms`.
    pub fn sell_percentage_in_window(&self, now_ms: i64, window_ms: i64) -> f64 {
        let cutoff = now_ms - window_ms;
        self.recent_sells
            .iter()
            .filter(|s| s.timestamp_ms >= cutoff)
            .map(|s| s.percentage)
            .sum()
    }
}

/// One recorded liquidity removal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LpRemovalRecord {
    pub timestamp_ms: i64,
    pub percentage: f64,
    pub slot: u64,
}

/// Liquidity telemetry for one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LPState {
    pub pool_address: String,
    pub mint_address: String,
    #[serde(with = "u64_string")]
    pub total_liquidity: u64,
    pub removals: Vec<LpRemovalRecord>,
    /// Monotonic; never decreases
    pub total_removed_percentage: f64,
}

impl LPState {
    pub fn new(pool_address: String, mint_address: String) -> Self {
        Self {
            pool_address,
            mint_address,
            total_liquidity: 0,
            removals: Vec::new(),
            total_removed_percentage: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_caps_at_capacity_and_keeps_cumulative_total() {
        let mut metrics = DevWalletMetrics::new("mint".into(), "dev".into());
        for i in 0..150i64 {
            metrics.record_sell(DevSellRecord {
                timestamp_ms: i,
                percentage: 1.0,
                slot: i as u64,
            });
        }

        assert_eq!(metrics.recent_sells.len(), DEV_SELL_RING_CAPACITY);
        assert_eq!(metrics.total_sell_count, 150);
        // Evicted entries stay accounted in the cumulative total
        assert!((metrics.total_sell_percentage - 150.0).abs() < 1e-9);
        // Ring entries remain ordered by non-decreasing timestamp
        let times: Vec<i64> = metrics.recent_sells.iter().map(|s| s.timestamp_ms).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(times.first(), Some(&50));
    }

    #[test]
    fn windowed_sum_only_counts_recent_entries() {
        let mut metrics = DevWalletMetrics::new("mint".into(), "dev".into());
        let now = 1_000_000i64;
        metrics.record_sell(DevSellRecord {
            timestamp_ms: now - 700_000,
            percentage: 10.0,
            slot: 1,
        });
        metrics.record_sell(DevSellRecord {
            timestamp_ms: now - 100_000,
            percentage: 25.0,
            slot: 2,
        });

        // 600s window catches only the second sell
        assert!((metrics.sell_percentage_in_window(now, 600_000) - 25.0).abs() < 1e-9);

        metrics.record_sell(DevSellRecord {
            timestamp_ms: now - 50_000,
            percentage: 10.0,
            slot: 3,
        });
        assert!((metrics.sell_percentage_in_window(now, 600_000) - 35.0).abs() < 1e-9);
    }

    #[test]
    fn status_rank_never_allows_reopen() {
        assert!(PositionStatus::Closed.rank() > PositionStatus::Open.rank());
        assert!(PositionStatus::Closing.rank() > PositionStatus::Open.rank());
        assert_eq!(PositionStatus::Closed.rank(), PositionStatus::Failed.rank());
    }

    #[test]
    fn position_serializes_balance_as_string() {
        let position = PositionState {
            id: "p1".into(),
            wallet_id: "w1".into(),
            tracked_token_id: "t1".into(),
            mint_address: "mint".into(),
            entry_amount_base: 0.5,
            token_balance: 12_345_678_901_234,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        };
        let json = serde_json::to_value(&position).unwrap();
        assert_eq!(json["tokenBalance"], "12345678901234");
        assert_eq!(json["status"], "open");
    }
}
