//! Conversation history persisted in the shared store
//!
//! A session is the full message list of one conversation, stored as JSON
//! under `<prefix>:session:<id>` with a sliding expiry. Reads and writes
//! never fail a request: problems are logged and the conversation carries
//! on without history.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::store::SharedStore;
use crate::types::ChatMessage;

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn SharedStore>,
    prefix: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn SharedStore>, key_prefix: &str, ttl: Duration) -> Self {
        Self {
            store,
            prefix: key_prefix.to_string(),
            ttl,
        }
    }

    pub fn key(&self, session_id: &str) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }

    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Stored history, or empty if unknown, unreadable or undecodable
    pub async fn load(&self, session_id: &str) -> Vec<ChatMessage> {
        match self.try_load(session_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("Failed to load session '{}': {:#}", session_id, e);
                Vec::new()
            }
        }
    }

    async fn try_load(&self, session_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let Some(raw) = self.store.get(&self.key(session_id)).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).context("stored session is not a message list")
    }

    /// Replace the stored history and refresh its expiry
    pub async fn save(&self, session_id: &str, history: &[ChatMessage]) {
        if let Err(e) = self.try_save(session_id, history).await {
            tracing::error!("Failed to save session '{}': {:#}", session_id, e);
        }
    }

    async fn try_save(&self, session_id: &str, history: &[ChatMessage]) -> anyhow::Result<()> {
        let raw = serde_json::to_string(history)?;
        self.store.set_ex(&self.key(session_id), &raw, self.ttl).await?;
        tracing::debug!("Saved {} messages to session '{}'", history.len(), session_id);
        Ok(())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}
