//! In-process shared store

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{SharedStore, StoreError, StoreResult};

/// Writes between sweeps of expired values
const SWEEP_EVERY: usize = 64;

struct ExpiringValue {
    value: String,
    expires_at: Option<Instant>,
}

impl ExpiringValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Tables {
    values: HashMap<String, ExpiringValue>,
    lists: HashMap<String, VecDeque<String>>,
    /// One notifier per list key; waiters on other keys are never woken
    waiters: HashMap<String, Arc<Notify>>,
    /// Writes since expired values were last swept
    writes_since_sweep: usize,
}

impl Tables {
    /// Drop expired values every [`SWEEP_EVERY`] writes. Keys that are never
    /// read again would otherwise stay resident forever.
    fn sweep_if_due(&mut self, now: Instant) {
        self.writes_since_sweep += 1;
        if self.writes_since_sweep < SWEEP_EVERY {
            return;
        }
        self.writes_since_sweep = 0;
        let before = self.values.len();
        self.values.retain(|_, v| !v.is_expired(now));
        let swept = before - self.values.len();
        if swept > 0 {
            tracing::debug!("Swept {} expired values from the memory store", swept);
        }
    }
}

/// In-process store with expiring values and blocking list pops.
///
/// Blocked `blpop` callers are woken in arrival order, one per pushed
/// element.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    fn notifier(&self, key: &str) -> StoreResult<Arc<Notify>> {
        let mut tables = self.lock()?;
        Ok(Arc::clone(
            tables
                .waiters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        ))
    }

    fn try_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut tables = self.lock()?;
        Ok(tables.lists.get_mut(key).and_then(VecDeque::pop_front))
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut tables = self.lock()?;
        let now = Instant::now();
        match tables.values.get(key) {
            Some(entry) if entry.is_expired(now) => {
                tables.values.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let now = Instant::now();
        tables.sweep_if_due(now);
        tables.values.insert(
            key.to_string(),
            ExpiringValue {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables.values.remove(key);
        tables.lists.remove(key);
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let (len, notify) = {
            let mut tables = self.lock()?;
            let list = tables.lists.entry(key.to_string()).or_default();
            list.push_back(value.to_string());
            let len = list.len();
            (len, tables.waiters.get(key).cloned())
        };
        if let Some(notify) = notify {
            notify.notify_one();
        }
        Ok(len)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let notify = self.notifier(key)?;

        loop {
            // Register interest before checking, so a push between the
            // check and the await is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key)? {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop(key);
            }
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let tables = self.lock()?;
        Ok(tables.lists.get(key).map_or(0, VecDeque::len))
    }
}
