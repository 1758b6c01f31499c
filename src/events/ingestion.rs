//! Event ingestion - chain callbacks in, typed internal events out
//!
//! Subscribes to the signing wallet's account over the RPC websocket,
//! translates updates into `InternalEvent`s, publishes them on the bus and
//! appends them to the event log. The subscription is re-established with a
//! delay on any websocket failure until shutdown.

use chrono::Utc;
use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::RpcAccountInfoConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{EventBus, EventKind, InternalEvent};
use crate::error::Result;
use crate::infra::{Db, RpcContext};

const RECONNECT_DELAY_MS: u64 = 1_000;

/// Chain callback subscriber
pub struct EventIngestion {
    rpc: Arc<RpcContext>,
    bus: Arc<EventBus>,
    db: Option<Arc<Db>>,
    shutdown: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EventIngestion {
    pub fn new(rpc: Arc<RpcContext>, bus: Arc<EventBus>, db: Option<Arc<Db>>) -> Self {
        Self {
            rpc,
            bus,
            db,
            shutdown: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Publish one event to the bus and append it to the event log.
    pub async fn ingest(&self, event: InternalEvent) {
        if let Some(db) = &self.db {
            if let Err(e) = db.append_event_log(&event).await {
                error!("Failed to append event log: {}", e);
            }
        }
        self.bus.publish(event).await;
    }

    /// Start the wallet-account subscription loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let ingestion = self.clone();
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = ingestion.subscribe_once() => {
                        if let Err(e) = result {
                            warn!("Wallet subscription dropped: {}, reconnecting", e);
                        }
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = sleep(Duration::from_millis(RECONNECT_DELAY_MS)) => {}
                        }
                    }
                }
            }
            info!("Event ingestion loop exited");
        });
        *self.task.lock().await = Some(handle);

        info!("Event ingestion started for wallet {}", self.rpc.payer());
        Ok(())
    }

    /// One websocket session; returns when the stream ends or errors.
    async fn subscribe_once(&self) -> Result<()> {
        let client = PubsubClient::new(self.rpc.ws_url())
            .await
            .map_err(|e| crate::error::Error::RpcConnection(e.to_string()))?;

        let wallet = self.rpc.payer();
        let config = RpcAccountInfoConfig {
            commitment: Some(CommitmentConfig::confirmed()),
            ..RpcAccountInfoConfig::default()
        };
        let (mut stream, unsubscribe) = client
            .account_subscribe(&wallet, Some(config))
            .await
            .map_err(|e| crate::error::Error::RpcConnection(e.to_string()))?;

        let mut previous_lamports: Option<u64> = None;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                update = stream.next() => {
                    let Some(update) = update else { break };
                    let lamports = update.value.lamports;
                    let changed = previous_lamports.map_or(true, |prev| prev != lamports);
                    previous_lamports = Some(lamports);
                    if !changed {
                        continue;
                    }

                    let event = InternalEvent {
                        id: uuid::Uuid::new_v4().to_string(),
                        slot: update.context.slot,
                        timestamp_ms: Utc::now().timestamp_millis(),
                        signature: String::new(),
                        kind: EventKind::WalletTransaction {
                            wallet_address: wallet.to_string(),
                            amount_base: lamports,
                        },
                    };
                    self.ingest(event).await;
                }
            }
        }

        unsubscribe().await;
        Ok(())
    }

    /// Cancel the subscription loop; the websocket unsubscribes on exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("Event ingestion stopped");
    }
}
