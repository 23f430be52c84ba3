//! Sink connection handling
//!
//! The data store behind the pipeline is reached through [`SinkConnector`]
//! (dial a store by selector) and [`SinkConnection`] (idempotent upsert and
//! increment). [`SinkHandle`] owns the one live connection of a node: it dials
//! lazily, replaces the connection wholesale on reconnect, and drops it when
//! the operator switches to another store.
//!
//! [`MemorySink`] is a complete in-process store used by default and in tests;
//! it can inject timeouts and hard failures.

use super::types::SinkUpdate;
use crate::error::{FleetError, Result};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[async_trait]
pub trait SinkConnection: Send + Sync {
    /// Sets `fields` on the document at `key`, creating it if needed.
    async fn upsert(&self, collection: &str, key: &str, fields: &Map<String, Value>) -> Result<()>;

    /// Adds each numeric field to the document at `key`, creating it if needed.
    async fn increment(
        &self,
        collection: &str,
        key: &str,
        fields: &Map<String, Value>,
    ) -> Result<()>;

    /// Applies one unit of work.
    async fn apply(&self, update: &SinkUpdate) -> Result<()> {
        if !update.set.is_empty() {
            self.upsert(update.collection, &update.key, &update.set)
                .await?;
        }
        if !update.inc.is_empty() {
            self.increment(update.collection, &update.key, &update.inc)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self, selector: &str) -> Result<Arc<dyn SinkConnection>>;
}

/// The node's current sink connection and selector.
pub struct SinkHandle {
    connector: Arc<dyn SinkConnector>,
    selector: parking_lot::RwLock<String>,
    connection: tokio::sync::RwLock<Option<Arc<dyn SinkConnection>>>,
}

impl SinkHandle {
    pub fn new(connector: Arc<dyn SinkConnector>, selector: impl Into<String>) -> Self {
        Self {
            connector,
            selector: parking_lot::RwLock::new(selector.into()),
            connection: tokio::sync::RwLock::new(None),
        }
    }

    pub fn selector(&self) -> String {
        self.selector.read().clone()
    }

    /// Current connection, dialing the selected store if there is none.
    pub async fn connection(&self) -> Result<Arc<dyn SinkConnection>> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.connection.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.dial().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the current connection and dials a fresh one.
    pub async fn reconnect(&self) -> Result<Arc<dyn SinkConnection>> {
        let mut slot = self.connection.write().await;
        *slot = None;
        let conn = self.dial().await?;
        *slot = Some(conn.clone());
        tracing::info!("Reconnected to sink {}", self.selector());
        Ok(conn)
    }

    /// Selects another store; the next use dials it.
    pub async fn switch(&self, selector: &str) {
        let mut slot = self.connection.write().await;
        *self.selector.write() = selector.to_string();
        *slot = None;
        tracing::info!("Sink switched to {}", selector);
    }

    pub async fn apply(&self, update: &SinkUpdate) -> Result<()> {
        let conn = self.connection().await?;
        conn.apply(update).await
    }

    async fn dial(&self) -> Result<Arc<dyn SinkConnection>> {
        let selector = self.selector();
        tracing::debug!("Dialing sink {}", selector);
        self.connector.connect(&selector).await
    }
}

/// In-process sink: one named store per selector.
#[derive(Default)]
pub struct MemorySink {
    stores: DashMap<String, Arc<MemoryStore>>,
    connects: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind `selector`, created on first use.
    pub fn store(&self, selector: &str) -> Arc<MemoryStore> {
        self.stores
            .entry(selector.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(selector)))
            .clone()
    }

    /// Number of successful dials so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkConnector for MemorySink {
    async fn connect(&self, selector: &str) -> Result<Arc<dyn SinkConnection>> {
        let store = self.store(selector);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(store)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    documents: DashMap<(String, String), Map<String, Value>>,
    pending_timeouts: AtomicUsize,
    pending_failures: AtomicUsize,
    operations: AtomicU64,
}

impl MemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: DashMap::new(),
            pending_timeouts: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            operations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The next `count` operations fail with a connection timeout.
    pub fn fail_next_with_timeout(&self, count: usize) {
        self.pending_timeouts.store(count, Ordering::SeqCst);
    }

    /// The next `count` operations fail with a non-recoverable error.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn document(&self, collection: &str, key: &str) -> Option<Map<String, Value>> {
        self.documents
            .get(&(collection.to_string(), key.to_string()))
            .map(|doc| doc.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Successful operations so far.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    fn check_injected(&self) -> Result<()> {
        if take_one(&self.pending_timeouts) {
            return Err(FleetError::ConnectionTimeout {
                reason: format!("{}: i/o timeout", self.name),
            });
        }
        if take_one(&self.pending_failures) {
            return Err(FleetError::Sink {
                reason: format!("{}: injected failure", self.name),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SinkConnection for MemoryStore {
    async fn upsert(&self, collection: &str, key: &str, fields: &Map<String, Value>) -> Result<()> {
        self.check_injected()?;
        let mut doc = self
            .documents
            .entry((collection.to_string(), key.to_string()))
            .or_default();
        for (field, value) in fields {
            doc.insert(field.clone(), value.clone());
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        key: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        self.check_injected()?;
        for (field, value) in fields {
            if !value.is_number() {
                return Err(FleetError::Sink {
                    reason: format!("cannot increment '{}' by non-number {}", field, value),
                });
            }
        }

        let mut doc = self
            .documents
            .entry((collection.to_string(), key.to_string()))
            .or_default();
        for (field, value) in fields {
            let current = doc.get(field).cloned().unwrap_or(Value::from(0));
            doc.insert(field.clone(), add_numbers(&current, value));
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Integer addition when both sides are integers, float otherwise.
fn add_numbers(a: &Value, b: &Value) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Value::from(x.saturating_add(y)),
        _ => Value::from(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
    }
}
