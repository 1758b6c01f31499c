//! Event bus - single-process typed pub/sub
//!
//! Handlers are dispatched sequentially in registration order for every
//! published event. Startup registers the state engine before the policy
//! engine, so policy evaluation always observes state that already includes
//! the event being evaluated.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::InternalEvent;

/// A subscriber on the event bus
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name used in logs
    fn name(&self) -> &str;

    /// Handle one event. Errors are logged by the bus and do not stop
    /// delivery to later handlers.
    async fn handle_event(&self, event: &InternalEvent);
}

/// Single-process pub/sub over the internal event taxonomy
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Registration order is delivery order.
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        debug!("Event bus: registered handler '{}'", handler.name());
        handlers.push(handler);
    }

    /// Publish one event to every handler, in registration order.
    pub async fn publish(&self, event: InternalEvent) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            handler.handle_event(&event).await;
        }
    }

    /// Number of registered handlers
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{test_event, EventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        order: Arc<Mutex<Vec<String>>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle_event(&self, _event: &InternalEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name.clone());
        }
    }

    #[tokio::test]
    async fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["state", "policy", "sentinel"] {
            bus.subscribe(Arc::new(Recorder {
                name: name.to_string(),
                order: order.clone(),
                count: AtomicUsize::new(0),
            }))
            .await;
        }

        bus.publish(test_event(EventKind::LpAdd {
            mint_address: "m".to_string(),
            pool_address: "p".to_string(),
            liquidity_amount: 1,
        }))
        .await;

        assert_eq!(
            order.lock().unwrap().clone(),
            vec!["state".to_string(), "policy".to_string(), "sentinel".to_string()]
        );
    }

    #[tokio::test]
    async fn every_handler_sees_every_event() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(Recorder {
            name: "h".to_string(),
            order,
            count: AtomicUsize::new(0),
        });
        bus.subscribe(handler.clone()).await;

        for _ in 0..5 {
            bus.publish(test_event(EventKind::WalletTransaction {
                wallet_address: "w".to_string(),
                amount_base: 1,
            }))
            .await;
        }

        assert_eq!(handler.count.load(Ordering::SeqCst), 5);
    }
}
