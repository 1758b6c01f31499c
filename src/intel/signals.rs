//! Cross-node signal bus
//!
//! Durable at-least-once channel over KV streams. Publishers append to
//! `{prefix}:signals:{channel}`; each node consumes through a shared
//! consumer group under its own consumer name. A message is acknowledged
//! only after every registered handler succeeds, so a crashed or failing
//! handler sees the message again.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::infra::KvStore;

/// Fixed process-wide consumer group name
const CONSUMER_GROUP: &str = "guardian-consumers";

/// Approximate stream length cap
const MAX_STREAM_LEN: usize = 10_000;

const POLL_TICK_MS: u64 = 500;
const BLOCK_TIMEOUT_MS: usize = 2_000;
const BATCH_SIZE: usize = 50;

/// One observation shared across nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub data: Value,
    pub timestamp_ms: i64,
}

/// A consumer of one signal channel
#[async_trait]
pub trait SignalHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, signal: &Signal) -> Result<()>;
}

/// Durable cross-node channel over KV streams
pub struct SignalBus {
    kv: Arc<KvStore>,
    node_id: String,
    prefix: String,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn SignalHandler>>>>,
    shutdown: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SignalBus {
    pub fn new(kv: Arc<KvStore>, node_id: &str, prefix: &str) -> Self {
        Self {
            kv,
            node_id: node_id.to_string(),
            prefix: prefix.to_string(),
            handlers: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    fn stream_key(&self, channel: &str) -> String {
        format!("{}:signals:{}", self.prefix, channel)
    }

    fn channel_of(&self, stream_key: &str) -> String {
        stream_key
            .strip_prefix(&format!("{}:signals:", self.prefix))
            .unwrap_or(stream_key)
            .to_string()
    }

    /// Append one signal to a channel stream.
    pub async fn publish(&self, channel: &str, signal_type: &str, data: Value) -> Result<Signal> {
        let signal = Signal {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: self.node_id.clone(),
            signal_type: signal_type.to_string(),
            data,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_string(&signal)?;
        self.kv
            .xadd_capped(&self.stream_key(channel), &payload, MAX_STREAM_LEN)
            .await?;
        debug!("Published {} signal to '{}'", signal_type, channel);
        Ok(signal)
    }

    /// Register a handler for a channel. Must happen before
    /// `start_consuming`.
    pub async fn subscribe(&self, channel: &str, handler: Arc<dyn SignalHandler>) {
        self.handlers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(handler);
    }

    /// Ensure consumer groups exist and start the polling loop on a
    /// dedicated connection.
    pub async fn start_consuming(self: &Arc<Self>) -> Result<()> {
        let channels: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        if channels.is_empty() {
            info!("Signal bus: no subscriptions, consumer not started");
            return Ok(());
        }

        let keys: Vec<String> = channels.iter().map(|c| self.stream_key(c)).collect();
        for key in &keys {
            self.kv.ensure_group(key, CONSUMER_GROUP).await?;
        }

        let mut conn = self.kv.dedicated_connection().await?;
        let bus = self.clone();
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(POLL_TICK_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = bus.poll_once(&mut conn, &keys).await {
                            warn!("Signal bus poll failed: {}", e);
                        }
                    }
                }
            }
            info!("Signal bus consumer exited");
        });
        *self.task.lock().await = Some(handle);

        info!(
            "Signal bus consuming {} channels as '{}'",
            channels.len(),
            self.node_id
        );
        Ok(())
    }

    async fn poll_once(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        keys: &[String],
    ) -> Result<()> {
        let reply = KvStore::read_group(
            conn,
            keys,
            CONSUMER_GROUP,
            &self.node_id,
            BATCH_SIZE,
            BLOCK_TIMEOUT_MS,
        )
        .await?;

        for stream in reply.keys {
            let channel = self.channel_of(&stream.key);
            for entry in stream.ids {
                let payload = match entry.map.get("payload") {
                    Some(value) => redis::from_redis_value::<String>(value)
                        .unwrap_or_default(),
                    None => String::new(),
                };

                let signal: Signal = match serde_json::from_str(&payload) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!("Dropping malformed signal on '{}': {}", channel, e);
                        self.kv.xack(&stream.key, CONSUMER_GROUP, &entry.id).await?;
                        continue;
                    }
                };

                // Our own signals are acknowledged and skipped.
                if signal.node_id == self.node_id {
                    self.kv.xack(&stream.key, CONSUMER_GROUP, &entry.id).await?;
                    continue;
                }

                if self.dispatch(&channel, &signal).await {
                    self.kv.xack(&stream.key, CONSUMER_GROUP, &entry.id).await?;
                }
                // Unacknowledged messages redeliver: at-least-once.
            }
        }
        Ok(())
    }

    /// Run every handler for the channel; true when all succeeded.
    async fn dispatch(&self, channel: &str, signal: &Signal) -> bool {
        let handlers = self
            .handlers
            .read()
            .await
            .get(channel)
            .cloned()
            .unwrap_or_default();

        let mut all_ok = true;
        for handler in handlers {
            if let Err(e) = handler.handle(signal).await {
                error!(
                    "Signal handler '{}' failed on '{}': {}",
                    handler.name(),
                    channel,
                    e
                );
                all_ok = false;
            }
        }
        all_ok
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("Signal bus stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_round_trips_with_type_field() {
        let signal = Signal {
            id: "s1".into(),
            node_id: "node-1".into(),
            signal_type: "rug_detected".into(),
            data: serde_json::json!({"mint": "abc"}),
            timestamp_ms: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "rug_detected");
        assert_eq!(json["nodeId"], "node-1");

        let back: Signal = serde_json::from_value(json).unwrap();
        assert_eq!(back.signal_type, "rug_detected");
        assert_eq!(back.data["mint"], "abc");
    }
}
