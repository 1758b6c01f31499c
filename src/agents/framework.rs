//! Agent base behavior
//!
//! Every agent is a cooperative task with a fixed tick interval, a typed
//! mailbox and three lifecycle hooks. The runner loop catches and logs tick
//! errors so a failing agent never stops ticking, and drains the mailbox
//! between ticks.

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::SwarmMessage;
use crate::error::Result;

/// The six swarm roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Scout,
    Analyst,
    Strategist,
    Sentinel,
    Executor,
    Memory,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Scout => write!(f, "scout"),
            AgentRole::Analyst => write!(f, "analyst"),
            AgentRole::Strategist => write!(f, "strategist"),
            AgentRole::Sentinel => write!(f, "sentinel"),
            AgentRole::Executor => write!(f, "executor"),
            AgentRole::Memory => write!(f, "memory"),
        }
    }
}

/// Live status snapshot for one agent
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub running: bool,
    pub paused: bool,
    pub tick_count: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Shared mutable status cell owned by the runner
#[derive(Default)]
pub(crate) struct StatusCell {
    pub running: AtomicBool,
    pub paused: AtomicBool,
    pub tick_count: AtomicU64,
    pub last_tick_ms: AtomicU64,
}

impl StatusCell {
    pub fn snapshot(&self) -> AgentStatus {
        let last_ms = self.last_tick_ms.load(Ordering::Relaxed);
        AgentStatus {
            running: self.running.load(Ordering::Relaxed),
            paused: self.paused.load(Ordering::Relaxed),
            tick_count: self.tick_count.load(Ordering::Relaxed),
            last_tick_at: (last_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_ms as i64))
                .flatten(),
        }
    }
}

/// One cooperative swarm member
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    fn tick_interval(&self) -> Duration;

    /// Called once when the loop starts.
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called once when the loop stops.
    async fn on_stop(&self) {}

    /// Periodic work. Errors are logged by the runner and never stop the
    /// loop.
    async fn tick(&self) -> Result<()>;

    /// A message arrived in this agent's mailbox.
    async fn on_message(&self, message: SwarmMessage);
}

/// Routing table: one sender per role, cloned into every agent
pub struct SwarmRouter {
    senders: StdRwLock<HashMap<AgentRole, Sender<SwarmMessage>>>,
}

impl SwarmRouter {
    pub fn new() -> Self {
        Self {
            senders: StdRwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, role: AgentRole, sender: Sender<SwarmMessage>) {
        self.senders
            .write()
            .expect("router lock poisoned")
            .insert(role, sender);
    }

    /// Send to one role's mailbox. A missing or stopped recipient drops the
    /// message with a warning.
    pub async fn send(&self, to: AgentRole, message: SwarmMessage) {
        let sender = self
            .senders
            .read()
            .expect("router lock poisoned")
            .get(&to)
            .cloned();
        match sender {
            Some(sender) => {
                if sender.send(message).await.is_err() {
                    warn!("Mailbox for {} is closed, message dropped", to);
                }
            }
            None => warn!("No mailbox registered for {}", to),
        }
    }

    /// Broadcast to every registered mailbox.
    pub async fn broadcast(&self, message: SwarmMessage) {
        let senders: Vec<(AgentRole, Sender<SwarmMessage>)> = self
            .senders
            .read()
            .expect("router lock poisoned")
            .iter()
            .map(|(role, sender)| (*role, sender.clone()))
            .collect();
        for (role, sender) in senders {
            if sender.send(message.clone()).await.is_err() {
                warn!("Broadcast to {} failed, mailbox closed", role);
            }
        }
    }
}

impl Default for SwarmRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running agent loop
pub(crate) struct AgentHandle {
    pub status: Arc<StatusCell>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Spawn the runner loop for one agent.
pub(crate) fn spawn_agent(
    agent: Arc<dyn Agent>,
    mailbox: Receiver<SwarmMessage>,
) -> AgentHandle {
    let status = Arc::new(StatusCell::default());
    let shutdown = CancellationToken::new();

    let loop_agent = agent.clone();
    let loop_status = status.clone();
    let loop_token = shutdown.clone();

    let task = tokio::spawn(async move {
        let role = loop_agent.role();
        if let Err(e) = loop_agent.on_start().await {
            error!("Agent {} failed to start: {}", role, e);
            return;
        }
        loop_status.running.store(true, Ordering::Relaxed);
        info!("Agent {} started", role);

        let mut ticker = interval(loop_agent.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = loop_token.cancelled() => break,
                _ = ticker.tick() => {
                    if loop_status.paused.load(Ordering::Relaxed) {
                        continue;
                    }
                    loop_status.tick_count.fetch_add(1, Ordering::Relaxed);
                    loop_status
                        .last_tick_ms
                        .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
                    if let Err(e) = loop_agent.tick().await {
                        error!("Agent {} tick failed: {}", role, e);
                    }
                }
                message = mailbox.recv() => {
                    match message {
                        Ok(message) => {
                            debug!("Agent {} received '{}'", role, message.channel());
                            loop_agent.on_message(message).await;
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        loop_status.running.store(false, Ordering::Relaxed);
        loop_agent.on_stop().await;
        info!("Agent {} stopped", role);
    });

    AgentHandle {
        status,
        shutdown,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct TickCounter {
        ticks: AtomicUsize,
        fail_every_other: bool,
        messages: AtomicUsize,
    }

    #[async_trait]
    impl Agent for TickCounter {
        fn role(&self) -> AgentRole {
            AgentRole::Scout
        }

        fn tick_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) -> Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && n % 2 == 0 {
                return Err(crate::error::Error::Internal("boom".to_string()));
            }
            Ok(())
        }

        async fn on_message(&self, _message: SwarmMessage) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn tick_errors_never_stop_the_loop() {
        let agent = Arc::new(TickCounter {
            ticks: AtomicUsize::new(0),
            fail_every_other: true,
            messages: AtomicUsize::new(0),
        });
        let (_tx, rx) = async_channel::unbounded();
        let handle = spawn_agent(agent.clone(), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(agent.ticks.load(Ordering::SeqCst) >= 4);
        assert!(handle.status.snapshot().running);

        handle.shutdown.cancel();
        let _ = handle.task.await;
        assert!(!handle.status.snapshot().running);
    }

    #[tokio::test]
    async fn mailbox_messages_reach_the_agent() {
        let agent = Arc::new(TickCounter {
            ticks: AtomicUsize::new(0),
            fail_every_other: false,
            messages: AtomicUsize::new(0),
        });
        let (tx, rx) = async_channel::unbounded();
        let handle = spawn_agent(agent.clone(), rx);

        let router = SwarmRouter::new();
        router.register(AgentRole::Scout, tx);
        router
            .send(
                AgentRole::Scout,
                SwarmMessage::Outcome(super::super::types::OutcomeFeedback {
                    mint_address: "m".into(),
                    pnl_percent: 1.0,
                    was_correct: true,
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agent.messages.load(Ordering::SeqCst), 1);

        handle.shutdown.cancel();
        let _ = handle.task.await;
    }

    #[tokio::test]
    async fn paused_agents_skip_ticks() {
        let agent = Arc::new(TickCounter {
            ticks: AtomicUsize::new(0),
            fail_every_other: false,
            messages: AtomicUsize::new(0),
        });
        let (_tx, rx) = async_channel::unbounded();
        let handle = spawn_agent(agent.clone(), rx);
        handle.status.paused.store(true, Ordering::Relaxed);

        // A tick may already be in flight when the pause lands; after it
        // drains the count must stop moving.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let baseline = agent.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(agent.ticks.load(Ordering::SeqCst), baseline);

        handle.shutdown.cancel();
        let _ = handle.task.await;
    }
}
