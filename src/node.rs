//! Node lifecycle - construction, startup order and graceful shutdown
//!
//! Startup: stores connect, RPC health check (fatal on failure), core
//! components construct, then start in dependency order: state engine
//! first on the bus, policy engine second, ingestion, orchestrator. The
//! swarm and intelligence stores only come up when enabled. Shutdown runs
//! in reverse; the state engine flushes a final snapshot.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agents::{
    AnalystAgent, ExecutorAgent, MemoryAgent, ScoutAgent, SentinelAgent, StrategistAgent, Swarm,
    SwarmRouter,
};
use crate::api::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::events::{ingestion::EventIngestion, EventBus};
use crate::execution::ExecutionEngine;
use crate::infra::{Db, Infra, KvStore, LlmClient, RpcContext};
use crate::intel::{DeployerScoreEngine, PatternDatabase, SignalBus, WalletGraph};
use crate::orchestrator::Orchestrator;
use crate::policy::PolicyEngine;
use crate::risk::{RiskEngine, RiskParameters};
use crate::state::StateEngine;

pub struct Node {
    config: Config,
    infra: Infra,
    state: Arc<StateEngine>,
    policy: Arc<PolicyEngine>,
    execution: Arc<ExecutionEngine>,
    ingestion: Arc<EventIngestion>,
    orchestrator: Arc<Orchestrator>,
    swarm: Option<Arc<Swarm>>,
    signals: Option<Arc<SignalBus>>,
    shutdown: CancellationToken,
}

impl Node {
    /// Connect infrastructure and start every component in order.
    pub async fn start(config: Config) -> Result<Self> {
        let db = Arc::new(Db::connect(&config.database.url).await?);
        let kv = Arc::new(KvStore::connect(&config.kv.url).await?);

        let rpc = Arc::new(RpcContext::new(&config.rpc, &config.wallet)?);
        let slot = rpc.health_check().await?;
        info!("RPC healthy at slot {}", slot);

        let infra = Infra {
            db: db.clone(),
            kv: kv.clone(),
            rpc: rpc.clone(),
        };

        // Construction
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateEngine::new(Some(db.clone()), Some(kv.clone())));
        let policy = Arc::new(PolicyEngine::new(state.clone(), Some(db.clone())));
        let risk_params = RiskParameters::from(&config.risk);
        let risk = Arc::new(RiskEngine::new(risk_params.clone(), state.clone()));
        let execution = Arc::new(ExecutionEngine::new(
            rpc.clone(),
            state.clone(),
            risk.clone(),
            Some(db.clone()),
            bus.clone(),
        ));
        let ingestion = Arc::new(EventIngestion::new(rpc.clone(), bus.clone(), Some(db.clone())));
        let orchestrator = Arc::new(Orchestrator::new(
            policy.clone(),
            state.clone(),
            execution.clone(),
            risk_params.clone(),
        ));

        // Startup order: the state engine registers on the bus before the
        // policy engine, so evaluations always observe fresh telemetry.
        state.start(&bus).await?;
        policy.start(&bus).await?;
        ingestion.start().await?;
        orchestrator.start(&bus).await;

        // Optional swarm
        let (swarm, signals) = if config.swarm.enabled {
            let (swarm, signals) = Self::start_swarm(
                &config,
                &infra,
                state.clone(),
                execution.clone(),
                risk_params.clone(),
            )
            .await?;
            (Some(swarm), Some(signals))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            infra,
            state,
            policy,
            execution,
            ingestion,
            orchestrator,
            swarm,
            signals,
            shutdown: CancellationToken::new(),
        })
    }

    async fn start_swarm(
        config: &Config,
        infra: &Infra,
        state: Arc<StateEngine>,
        execution: Arc<ExecutionEngine>,
        risk_params: RiskParameters,
    ) -> Result<(Arc<Swarm>, Arc<SignalBus>)> {
        let prefix = &config.signals.channel_prefix;
        let graph = Arc::new(WalletGraph::new(Some(infra.kv.clone()), prefix));
        let deployers = Arc::new(DeployerScoreEngine::new(Some(infra.kv.clone()), prefix));
        let patterns = Arc::new(PatternDatabase::new(Some(infra.kv.clone()), prefix));
        let loaded = patterns.load().await?;
        info!("Pattern database loaded {} patterns", loaded);

        let signals = Arc::new(SignalBus::new(
            infra.kv.clone(),
            &config.signals.node_id,
            prefix,
        ));
        let llm = Arc::new(LlmClient::new(&config.swarm));

        let router = Arc::new(SwarmRouter::new());
        let swarm = Arc::new(Swarm::new(router.clone()));

        let sentinel = Arc::new(SentinelAgent::new(
            state.clone(),
            graph.clone(),
            infra.rpc.clone(),
            llm.clone(),
            Some(signals.clone()),
            router.clone(),
        ));
        signals
            .subscribe(crate::agents::sentinel::RUGS_CHANNEL, sentinel.rug_listener())
            .await;

        swarm
            .register(Arc::new(ScoutAgent::new(
                infra.rpc.clone(),
                graph.clone(),
                deployers.clone(),
                Some(signals.clone()),
                router.clone(),
            )))
            .await;
        swarm
            .register(Arc::new(AnalystAgent::new(
                infra.rpc.clone(),
                graph.clone(),
                patterns.clone(),
                llm.clone(),
                router.clone(),
            )))
            .await;
        swarm
            .register(Arc::new(StrategistAgent::new(
                state.clone(),
                execution.clone(),
                llm.clone(),
                router.clone(),
                risk_params.clone(),
            )))
            .await;
        swarm.register(sentinel).await;
        swarm
            .register(Arc::new(ExecutorAgent::new(
                execution,
                router.clone(),
                risk_params,
            )))
            .await;
        swarm
            .register(Arc::new(MemoryAgent::new(
                Some(infra.kv.clone()),
                state,
                router.clone(),
                prefix,
            )))
            .await;

        signals.start_consuming().await?;
        swarm.start().await?;

        Ok((swarm, signals))
    }

    /// Serve the HTTP API until a termination signal, then shut down.
    pub async fn run(self) -> Result<()> {
        let api_state = Arc::new(ApiState::new(
            self.infra.clone(),
            self.state.clone(),
            self.policy.clone(),
            self.execution.clone(),
            RiskParameters::from(&self.config.risk),
            self.swarm.clone(),
        ));

        let addr: SocketAddr = format!("{}:{}", self.config.api.host, self.config.api.port)
            .parse()
            .map_err(|e| crate::error::Error::Config(format!("invalid API bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP API listening on {}", addr);

        let app = router(api_state).into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        });

        let shutdown_trigger = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("Termination signal received");
            shutdown_trigger.cancel();
        });

        if let Err(e) = server.await {
            error!("HTTP server error: {}", e);
        }

        self.stop().await;
        Ok(())
    }

    /// Reverse-order shutdown. Already-submitted transactions are not
    /// cancelled; their outcomes are recorded on next observation.
    pub async fn stop(&self) {
        info!("Shutting down");

        if let Some(swarm) = &self.swarm {
            swarm.stop().await;
        }
        if let Some(signals) = &self.signals {
            signals.stop().await;
        }
        self.orchestrator.stop().await;
        self.ingestion.stop().await;
        self.policy.stop().await;
        self.state.stop().await;
        self.infra.db.close().await;

        info!("Shutdown complete");
    }
}

async fn wait_for_termination() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
