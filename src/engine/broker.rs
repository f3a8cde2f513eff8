//! Slot broker
//!
//! Bounds the number of generations running at once across every gateway
//! process sharing a store. The pool is a list of `N` tokens; a request
//! pops one before generating and pushes it back afterwards.

use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;
use crate::store::SharedStore;

const SLOT_TOKEN: &str = "1";

/// Global processing-slot pool
pub struct SlotBroker {
    store: Arc<dyn SharedStore>,
    key: String,
    /// Zero or negative disables gating
    capacity: i64,
    timeout: Duration,
}

impl SlotBroker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        key_prefix: &str,
        capacity: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            key: format!("{}:processing_slots", key_prefix),
            capacity,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reset the pool to exactly `capacity` tokens
    pub async fn initialize(&self) -> anyhow::Result<()> {
        if !self.is_enabled() {
            tracing::info!("Concurrency limiting is disabled");
            return Ok(());
        }

        self.store.delete(&self.key).await?;
        for _ in 0..self.capacity {
            self.store.rpush(&self.key, SLOT_TOKEN).await?;
        }
        tracing::info!(
            "Initialized concurrency control with {} slots in the queue '{}'",
            self.capacity,
            self.key
        );
        Ok(())
    }

    /// Wait for a slot using the configured timeout
    pub async fn acquire(self: &Arc<Self>, model_id: &str) -> Result<SlotTicket, GatewayError> {
        self.acquire_timeout(model_id, self.timeout).await
    }

    pub async fn acquire_timeout(
        self: &Arc<Self>,
        model_id: &str,
        timeout: Duration,
    ) -> Result<SlotTicket, GatewayError> {
        if !self.is_enabled() {
            return Ok(SlotTicket::disabled());
        }

        tracing::debug!("Request for model '{}' is waiting for a processing slot...", model_id);
        match self.store.blpop(&self.key, timeout).await {
            Ok(Some(_)) => {
                tracing::debug!("Slot acquired for model '{}'", model_id);
                Ok(SlotTicket {
                    broker: Some(Arc::clone(self)),
                })
            }
            Ok(None) => {
                tracing::warn!("Timed out waiting for a processing slot for model '{}'", model_id);
                Err(GatewayError::Busy(
                    "All processing slots are busy; request timed out.".to_string(),
                ))
            }
            Err(e) => {
                tracing::error!("Could not pop from the request queue: {}", e);
                Err(GatewayError::Busy(
                    "Could not connect to request queue.".to_string(),
                ))
            }
        }
    }

    /// Tokens currently free
    pub async fn available(&self) -> anyhow::Result<usize> {
        Ok(self.store.llen(&self.key).await?)
    }

    async fn return_token(&self) {
        match self.store.rpush(&self.key, SLOT_TOKEN).await {
            Ok(_) => tracing::debug!("Processing slot released"),
            Err(e) => tracing::error!("Failed to release processing slot: {}", e),
        }
    }
}

impl std::fmt::Debug for SlotBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotBroker")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Proof of one acquired slot.
///
/// Call [`SlotTicket::release`] where possible. A ticket dropped without
/// being released returns its token from a spawned task.
#[derive(Debug)]
#[must_use = "dropping a ticket releases its slot"]
pub struct SlotTicket {
    broker: Option<Arc<SlotBroker>>,
}

impl SlotTicket {
    /// Ticket from a broker with gating disabled; releasing is a no-op
    pub fn disabled() -> Self {
        Self { broker: None }
    }

    pub fn is_held(&self) -> bool {
        self.broker.is_some()
    }

    pub async fn release(mut self) {
        if let Some(broker) = self.broker.take() {
            broker.return_token().await;
        }
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        let Some(broker) = self.broker.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { broker.return_token().await });
            }
            Err(_) => tracing::error!("Slot ticket dropped outside a runtime; slot lost"),
        }
    }
}
