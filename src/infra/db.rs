//! Relational store access (PostgreSQL via sqlx)
//!
//! Plain SQL, no ORM. Token balances are stored as decimal strings so the
//! full u64 range survives the trip through the database.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use crate::error::{Error, Result};
use crate::execution::types::{ExecutionResult, ExecutionStatus, SimulationSummary};
use crate::events::InternalEvent;
use crate::policy::types::{ActionParams, PolicyDefinition};
use crate::state::types::{PositionState, PositionStatus, PositionUpdate};

/// A registered trading wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRow {
    pub id: String,
    pub address: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A token the node tracks for a wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTokenRow {
    pub id: String,
    pub wallet_id: String,
    pub mint_address: String,
    pub symbol: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate-only network telemetry for the metrics endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub open_positions: i64,
    pub executions_confirmed: i64,
    pub executions_failed: i64,
    pub events_last_24h: i64,
}

/// Serialize a unit enum to its wire name for a TEXT column.
fn to_db_enum<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Err(Error::Serialization(format!(
            "expected string-encoded enum, got {}",
            other
        ))),
    }
}

/// Parse a TEXT column back into a unit enum by its wire name.
fn from_db_enum<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(Into::into)
}

fn parse_balance(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| Error::Database(format!("invalid token balance: {}", raw)))
}

/// Relational store handle
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect and verify the pool is usable.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        info!("Connected to relational store");
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── positions ───────────────────────────────────────────────

    fn position_from_row(row: &PgRow) -> Result<PositionState> {
        let balance_raw: String = row.try_get("token_balance")?;
        let status_raw: String = row.try_get("status")?;
        Ok(PositionState {
            id: row.try_get("id")?,
            wallet_id: row.try_get("wallet_id")?,
            tracked_token_id: row.try_get("tracked_token_id")?,
            mint_address: row.try_get("mint_address")?,
            entry_amount_base: row.try_get("entry_amount_base")?,
            token_balance: parse_balance(&balance_raw)?,
            entry_price: row.try_get("entry_price")?,
            status: from_db_enum::<PositionStatus>(&status_raw)?,
            opened_at: row.try_get("opened_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }

    pub async fn load_open_positions(&self) -> Result<Vec<PositionState>> {
        let rows = sqlx::query("SELECT * FROM position WHERE status = 'open'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::position_from_row).collect()
    }

    pub async fn get_position(&self, id: &str) -> Result<Option<PositionState>> {
        let row = sqlx::query("SELECT * FROM position WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::position_from_row).transpose()
    }

    pub async fn insert_position(&self, position: &PositionState) -> Result<()> {
        sqlx::query(
            "INSERT INTO position (id, wallet_id, tracked_token_id, mint_address, \
             entry_amount_base, token_balance, entry_price, status, opened_at, closed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&position.id)
        .bind(&position.wallet_id)
        .bind(&position.tracked_token_id)
        .bind(&position.mint_address)
        .bind(position.entry_amount_base)
        .bind(position.token_balance.to_string())
        .bind(position.entry_price)
        .bind(to_db_enum(&position.status)?)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_position(&self, id: &str, update: &PositionUpdate) -> Result<()> {
        // Narrow update: only the mutable execution-path fields change.
        sqlx::query(
            "UPDATE position SET \
             token_balance = COALESCE($2, token_balance), \
             entry_price = COALESCE($3, entry_price), \
             status = COALESCE($4, status), \
             closed_at = COALESCE($5, closed_at) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.token_balance.map(|b| b.to_string()))
        .bind(update.entry_price)
        .bind(match &update.status {
            Some(status) => Some(to_db_enum(status)?),
            None => None,
        })
        .bind(update.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── policies ────────────────────────────────────────────────

    fn policy_from_row(row: &PgRow) -> Result<PolicyDefinition> {
        let trigger_raw: String = row.try_get("trigger")?;
        let action_raw: String = row.try_get("action")?;
        let params: Value = row.try_get("action_params")?;
        let window_blocks: Option<i64> = row.try_get("window_blocks")?;
        let window_seconds: Option<i64> = row.try_get("window_seconds")?;
        Ok(PolicyDefinition {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            trigger: from_db_enum(&trigger_raw)?,
            threshold: row.try_get("threshold")?,
            window_blocks: window_blocks.map(|w| w as u64),
            window_seconds: window_seconds.map(|w| w as u64),
            action: from_db_enum(&action_raw)?,
            action_params: serde_json::from_value::<ActionParams>(params)?,
            priority: row.try_get("priority")?,
            is_active: row.try_get("is_active")?,
            tracked_token_id: row.try_get("tracked_token_id")?,
        })
    }

    pub async fn load_active_policies(&self) -> Result<Vec<PolicyDefinition>> {
        let rows = sqlx::query("SELECT * FROM policy WHERE is_active = TRUE ORDER BY priority DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::policy_from_row).collect()
    }

    pub async fn insert_policy(&self, policy: &PolicyDefinition) -> Result<()> {
        sqlx::query(
            "INSERT INTO policy (id, name, trigger, threshold, window_blocks, window_seconds, \
             action, action_params, priority, is_active, tracked_token_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&policy.id)
        .bind(&policy.name)
        .bind(to_db_enum(&policy.trigger)?)
        .bind(policy.threshold)
        .bind(policy.window_blocks.map(|w| w as i64))
        .bind(policy.window_seconds.map(|w| w as i64))
        .bind(to_db_enum(&policy.action)?)
        .bind(serde_json::to_value(&policy.action_params)?)
        .bind(policy.priority)
        .bind(policy.is_active)
        .bind(&policy.tracked_token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a policy row. Returns whether a row existed.
    pub async fn delete_policy(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM policy WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── executions ──────────────────────────────────────────────

    fn execution_from_row(row: &PgRow) -> Result<ExecutionResult> {
        let status_raw: String = row.try_get("status")?;
        let simulation: Option<Value> = row.try_get("simulation_result")?;
        Ok(ExecutionResult {
            id: row.try_get("id")?,
            position_id: row.try_get("position_id")?,
            policy_id: row.try_get("policy_id")?,
            status: from_db_enum::<ExecutionStatus>(&status_raw)?,
            tx_signature: row.try_get("tx_signature")?,
            amount_in: row.try_get("amount_in")?,
            amount_out: row.try_get("amount_out")?,
            error_message: row.try_get("error_message")?,
            simulation_result: simulation
                .map(serde_json::from_value::<SimulationSummary>)
                .transpose()?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    pub async fn insert_execution(&self, result: &ExecutionResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution (id, position_id, policy_id, status, tx_signature, \
             amount_in, amount_out, error_message, simulation_result, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&result.id)
        .bind(&result.position_id)
        .bind(&result.policy_id)
        .bind(to_db_enum(&result.status)?)
        .bind(&result.tx_signature)
        .bind(&result.amount_in)
        .bind(&result.amount_out)
        .bind(&result.error_message)
        .bind(match &result.simulation_result {
            Some(sim) => Some(serde_json::to_value(sim)?),
            None => None,
        })
        .bind(result.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<ExecutionResult>> {
        let row = sqlx::query("SELECT * FROM execution WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::execution_from_row).transpose()
    }

    pub async fn list_executions(&self, limit: i64) -> Result<Vec<ExecutionResult>> {
        let rows = sqlx::query("SELECT * FROM execution ORDER BY completed_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::execution_from_row).collect()
    }

    // ── event log ───────────────────────────────────────────────

    pub async fn append_event_log(&self, event: &InternalEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_log (id, slot, kind, mint_address, signature, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW())",
        )
        .bind(&event.id)
        .bind(event.slot as i64)
        .bind(event.kind_name())
        .bind(event.mint_address())
        .bind(&event.signature)
        .bind(serde_json::to_value(event)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── wallets and tracked tokens ──────────────────────────────

    pub async fn list_wallets(&self) -> Result<Vec<WalletRow>> {
        let rows = sqlx::query("SELECT id, address, label, created_at FROM wallet ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(WalletRow {
                    id: row.try_get("id")?,
                    address: row.try_get("address")?,
                    label: row.try_get("label")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn list_wallet_tokens(&self, wallet_id: &str) -> Result<Vec<TrackedTokenRow>> {
        let rows = sqlx::query(
            "SELECT id, wallet_id, mint_address, symbol, created_at \
             FROM tracked_token WHERE wallet_id = $1 ORDER BY created_at",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TrackedTokenRow {
                    id: row.try_get("id")?,
                    wallet_id: row.try_get("wallet_id")?,
                    mint_address: row.try_get("mint_address")?,
                    symbol: row.try_get("symbol")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    // ── aggregate telemetry ─────────────────────────────────────

    pub async fn network_metrics(&self) -> Result<NetworkMetrics> {
        let open_positions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM position WHERE status = 'open'")
                .fetch_one(&self.pool)
                .await?;
        let executions_confirmed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM execution WHERE status = 'confirmed'")
                .fetch_one(&self.pool)
                .await?;
        let executions_failed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM execution WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;
        let events_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM event_log WHERE created_at > NOW() - INTERVAL '24 hours'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(NetworkMetrics {
            open_positions,
            executions_confirmed,
            executions_failed,
            events_last_24h,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::{PolicyAction, TriggerType};

    #[test]
    fn enum_round_trip_through_text_columns() {
        let raw = to_db_enum(&TriggerType::DevSellPercentage).unwrap();
        assert_eq!(raw, "DEV_SELL_PERCENTAGE");
        let back: TriggerType = from_db_enum(&raw).unwrap();
        assert_eq!(back, TriggerType::DevSellPercentage);

        let raw = to_db_enum(&PolicyAction::PartialSell).unwrap();
        assert_eq!(raw, "PARTIAL_SELL");

        let raw = to_db_enum(&ExecutionStatus::Confirmed).unwrap();
        assert_eq!(raw, "confirmed");
        let back: ExecutionStatus = from_db_enum(&raw).unwrap();
        assert_eq!(back, ExecutionStatus::Confirmed);
    }

    #[test]
    fn balance_parsing_rejects_garbage() {
        assert_eq!(parse_balance("18446744073709551615").unwrap(), u64::MAX);
        assert!(parse_balance("not-a-number").is_err());
        assert!(parse_balance("-5").is_err());
    }
}
