//! Swarm registry - owns the six agents and their lifecycles

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::framework::{spawn_agent, Agent, AgentHandle, AgentRole, AgentStatus, SwarmRouter};
use super::types::SwarmMessage;
use crate::error::{Error, Result};

/// Registry of role -> agent with operator controls
pub struct Swarm {
    router: Arc<SwarmRouter>,
    pending: Mutex<Vec<(Arc<dyn Agent>, async_channel::Receiver<SwarmMessage>)>>,
    handles: Mutex<HashMap<AgentRole, AgentHandle>>,
}

impl Swarm {
    pub fn new(router: Arc<SwarmRouter>) -> Self {
        Self {
            router,
            pending: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> Arc<SwarmRouter> {
        self.router.clone()
    }

    /// Register an agent and wire its mailbox into the router.
    pub async fn register(&self, agent: Arc<dyn Agent>) {
        let (tx, rx) = async_channel::unbounded();
        self.router.register(agent.role(), tx);
        self.pending.lock().await.push((agent, rx));
    }

    /// Start every registered agent. One agent's startup failure is logged
    /// inside its own task and does not abort the others.
    pub async fn start(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let mut handles = self.handles.lock().await;
        let count = pending.len();
        for (agent, mailbox) in pending.drain(..) {
            let role = agent.role();
            handles.insert(role, spawn_agent(agent, mailbox));
        }
        info!("Swarm started with {} agents", count);
        Ok(())
    }

    /// Stop every agent, tolerating individual failures.
    pub async fn stop(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.values() {
            handle.shutdown.cancel();
        }
        for (role, handle) in handles.drain() {
            if handle.task.await.is_err() {
                warn!("Agent {} task panicked during shutdown", role);
            }
        }
        info!("Swarm stopped");
    }

    pub async fn pause_agent(&self, role: AgentRole) -> Result<()> {
        let handles = self.handles.lock().await;
        let handle = handles
            .get(&role)
            .ok_or_else(|| Error::Internal(format!("no agent registered for {}", role)))?;
        handle.status.paused.store(true, Ordering::Relaxed);
        info!("Agent {} paused", role);
        Ok(())
    }

    pub async fn resume_agent(&self, role: AgentRole) -> Result<()> {
        let handles = self.handles.lock().await;
        let handle = handles
            .get(&role)
            .ok_or_else(|| Error::Internal(format!("no agent registered for {}", role)))?;
        handle.status.paused.store(false, Ordering::Relaxed);
        info!("Agent {} resumed", role);
        Ok(())
    }

    /// Status snapshot keyed by role name.
    pub async fn status(&self) -> HashMap<String, AgentStatus> {
        self.handles
            .lock()
            .await
            .iter()
            .map(|(role, handle)| (role.to_string(), handle.status.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Duration;

    struct Noop {
        role: AgentRole,
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl Agent for Noop {
        fn role(&self) -> AgentRole {
            self.role
        }

        fn tick_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) -> crate::error::Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_message(&self, _message: SwarmMessage) {}
    }

    #[tokio::test]
    async fn swarm_starts_pauses_and_stops_agents() {
        let swarm = Swarm::new(Arc::new(SwarmRouter::new()));
        let scout = Arc::new(Noop {
            role: AgentRole::Scout,
            ticks: AtomicUsize::new(0),
        });
        let analyst = Arc::new(Noop {
            role: AgentRole::Analyst,
            ticks: AtomicUsize::new(0),
        });
        swarm.register(scout.clone()).await;
        swarm.register(analyst.clone()).await;

        swarm.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = swarm.status().await;
        assert_eq!(status.len(), 2);
        assert!(status["scout"].running);
        assert!(status["scout"].tick_count > 0);

        swarm.pause_agent(AgentRole::Scout).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let paused_at = scout.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scout.ticks.load(Ordering::SeqCst), paused_at);
        // The other agent keeps ticking
        assert!(analyst.ticks.load(Ordering::SeqCst) > 0);

        swarm.resume_agent(AgentRole::Scout).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scout.ticks.load(Ordering::SeqCst) > paused_at);

        swarm.stop().await;
        assert!(swarm.status().await.is_empty());
    }

    #[tokio::test]
    async fn pause_unknown_role_errors() {
        let swarm = Swarm::new(Arc::new(SwarmRouter::new()));
        assert!(swarm.pause_agent(AgentRole::Memory).await.is_err());
    }
}
