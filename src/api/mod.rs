//! HTTP API - operator surface over the running node
//!
//! Axum 0.7 router with a permissive CORS layer, a 30 s request timeout, a
//! 1 MB body cap and a small per-client rate limit. Error kinds map onto
//! status codes: validation 400, unknown entity 404, duplicate 409,
//! everything else 500 through the fallback handler.

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use crate::agents::Swarm;
use crate::error::Error;
use crate::execution::{BuyRequest, ExecutionEngine};
use crate::infra::Infra;
use crate::policy::{PolicyDefinition, PolicyEngine};
use crate::risk::RiskParameters;
use crate::state::StateEngine;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const RATE_LIMIT_PER_MINUTE: u32 = 100;

/// Shared handler state
pub struct ApiState {
    pub infra: Infra,
    pub state: Arc<StateEngine>,
    pub policy: Arc<PolicyEngine>,
    pub execution: Arc<ExecutionEngine>,
    pub risk: RiskParameters,
    pub swarm: Option<Arc<Swarm>>,
    rate_windows: DashMap<String, (i64, u32)>,
}

impl ApiState {
    pub fn new(
        infra: Infra,
        state: Arc<StateEngine>,
        policy: Arc<PolicyEngine>,
        execution: Arc<ExecutionEngine>,
        risk: RiskParameters,
        swarm: Option<Arc<Swarm>>,
    ) -> Self {
        Self {
            infra,
            state,
            policy,
            execution,
            risk,
            swarm,
            rate_windows: DashMap::new(),
        }
    }
}

/// API error with a status code and structured details
struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    fn validation(message: &str, details: serde_json::Value) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
            details: Some(details),
        }
    }

    fn not_found(entity: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{} not found", entity),
            details: None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidPolicy(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::PolicyNotFound(_) | Error::PositionNotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Internal error on API path: {}", e);
        }
        Self {
            status,
            message: e.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "details": self.details,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the full router with middleware and shared state.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/:id", axum::routing::delete(delete_policy))
        .route("/wallets", get(list_wallets))
        .route("/wallets/:wallet_id/tokens", get(list_wallet_tokens))
        .route("/positions", get(list_positions).post(open_position))
        .route("/positions/:id", get(get_position))
        .route("/executions", get(list_executions))
        .route("/executions/:id", get(get_execution))
        .route("/metrics/network", get(network_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(
            REQUEST_TIMEOUT_SECS,
        )))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Fixed-window rate limit per client address.
async fn rate_limit(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let client = addr.ip().to_string();
    let now_minute = Utc::now().timestamp() / 60;

    let mut entry = state.rate_windows.entry(client).or_insert((now_minute, 0));
    if entry.0 != now_minute {
        *entry = (now_minute, 0);
    }
    entry.1 += 1;
    let over = entry.1 > RATE_LIMIT_PER_MINUTE;
    drop(entry);

    if over {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limit exceeded"})),
        )
            .into_response();
    }
    next.run(request).await
}

// ── health ──────────────────────────────────────────────────────

async fn health(State(state): State<Arc<ApiState>>) -> ApiResult<Json<serde_json::Value>> {
    let db_ok = state.infra.db.ping().await.is_ok();
    let kv_ok = state.infra.kv.ping().await.is_ok();
    let slot = state.infra.rpc.current_slot().await.ok();

    let healthy = db_ok && kv_ok && slot.is_some();
    Ok(Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "db": db_ok,
        "kv": kv_ok,
        "slot": slot,
        "serverTime": Utc::now().timestamp_millis(),
    })))
}

// ── policies ────────────────────────────────────────────────────

async fn list_policies(State(state): State<Arc<ApiState>>) -> Json<Vec<PolicyDefinition>> {
    Json(state.policy.list_policies().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePolicyBody {
    #[serde(default)]
    id: Option<String>,
    name: String,
    trigger: crate::policy::TriggerType,
    threshold: f64,
    #[serde(default)]
    window_blocks: Option<u64>,
    #[serde(default)]
    window_seconds: Option<u64>,
    action: crate::policy::PolicyAction,
    #[serde(default)]
    action_params: crate::policy::ActionParams,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    tracked_token_id: Option<String>,
}

async fn create_policy(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreatePolicyBody>,
) -> ApiResult<(StatusCode, Json<PolicyDefinition>)> {
    let policy = PolicyDefinition {
        id: body.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: body.name,
        trigger: body.trigger,
        threshold: body.threshold,
        window_blocks: body.window_blocks,
        window_seconds: body.window_seconds,
        action: body.action,
        action_params: body.action_params,
        priority: body.priority,
        is_active: true,
        tracked_token_id: body.tracked_token_id,
    };

    policy.validate().map_err(|e| {
        ApiError::validation(
            "invalid policy",
            json!({"reason": e.to_string()}),
        )
    })?;

    state.policy.add_policy(policy.clone()).await?;
    state.infra.db.insert_policy(&policy).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn delete_policy(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.policy.remove_policy(&id).await?;
    state.infra.db.delete_policy(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── wallets ─────────────────────────────────────────────────────

async fn list_wallets(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<Vec<crate::infra::db::WalletRow>>> {
    Ok(Json(state.infra.db.list_wallets().await?))
}

async fn list_wallet_tokens(
    State(state): State<Arc<ApiState>>,
    Path(wallet_id): Path<String>,
) -> ApiResult<Json<Vec<crate::infra::db::TrackedTokenRow>>> {
    Ok(Json(state.infra.db.list_wallet_tokens(&wallet_id).await?))
}

// ── positions ───────────────────────────────────────────────────

async fn list_positions(
    State(state): State<Arc<ApiState>>,
) -> Json<Vec<crate::state::PositionState>> {
    Json(state.state.get_open_positions())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPositionBody {
    mint_address: String,
    /// Entry size in whole base-currency units
    base_amount: f64,
    #[serde(default)]
    max_slippage_bps: Option<u64>,
    #[serde(default)]
    priority_fee_base: Option<u64>,
    wallet_id: String,
    tracked_token_id: String,
}

async fn open_position(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<OpenPositionBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if body.base_amount <= 0.0 {
        return Err(ApiError::validation(
            "invalid position request",
            json!({"baseAmount": "must be positive"}),
        ));
    }
    if body.base_amount > state.risk.max_position_size_base {
        return Err(ApiError::validation(
            "invalid position request",
            json!({"baseAmount": format!("exceeds max {}", state.risk.max_position_size_base)}),
        ));
    }

    let request = BuyRequest {
        mint_address: body.mint_address,
        base_amount: (body.base_amount * 1e9) as u64,
        max_slippage_bps: body
            .max_slippage_bps
            .unwrap_or(state.risk.max_slippage_bps)
            .min(state.risk.max_slippage_bps),
        priority_fee_base: body
            .priority_fee_base
            .unwrap_or(state.risk.max_priority_fee_base)
            .min(state.risk.max_priority_fee_base),
        wallet_id: body.wallet_id,
        tracked_token_id: body.tracked_token_id,
    };

    let (result, position) = state.execution.execute_buy(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"position": position, "execution": result})),
    ))
}

async fn get_position(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::state::PositionState>> {
    if let Some(position) = state.state.get_position(&id) {
        return Ok(Json(position));
    }
    match state.infra.db.get_position(&id).await? {
        Some(position) => Ok(Json(position)),
        None => Err(ApiError::not_found("position")),
    }
}

// ── executions ──────────────────────────────────────────────────

async fn list_executions(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<Vec<crate::execution::ExecutionResult>>> {
    Ok(Json(state.infra.db.list_executions(100).await?))
}

async fn get_execution(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::execution::ExecutionResult>> {
    match state.infra.db.get_execution(&id).await? {
        Some(execution) => Ok(Json(execution)),
        None => Err(ApiError::not_found("execution")),
    }
}

// ── aggregate telemetry ─────────────────────────────────────────

/// Aggregate-only: counts and agent liveness, never addresses or strategy
/// data.
async fn network_metrics(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let metrics = state.infra.db.network_metrics().await?;
    let agents = match &state.swarm {
        Some(swarm) => Some(swarm.status().await),
        None => None,
    };
    Ok(Json(json!({
        "metrics": metrics,
        "agents": agents,
    })))
}
