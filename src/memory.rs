//! In-process storage backend used by the test suites.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;
use mongodb::bson::Document;

use crate::db::{Collection, Connector, DocumentCollection, SharedClient, StoreClient};

#[derive(Clone, Copy, Debug, Default)]
struct Behavior {
    connect_delay: Duration,
    fail_connect: bool,
    fail_ping: bool,
    fail_close: bool,
    stall_connect: bool,
    stalled: bool,
    stall_queries: bool,
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    closes: AtomicUsize,
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

/// Clones share counters and stored documents.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    behavior: Behavior,
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect(mut self) -> Self {
        self.behavior.fail_connect = true;
        self
    }

    pub fn failing_ping(mut self) -> Self {
        self.behavior.fail_ping = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.behavior.fail_close = true;
        self
    }

    /// Connect never completes.
    pub fn stalling_connect(mut self) -> Self {
        self.behavior.stall_connect = true;
        self
    }

    /// Ping and every collection call never complete.
    pub fn stalled(mut self) -> Self {
        self.behavior.stalled = true;
        self
    }

    /// Connects and pings normally, collection calls never complete.
    pub fn stalling_queries(mut self) -> Self {
        self.behavior.stall_queries = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.behavior.connect_delay = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn documents(&self, database: &str, name: &str) -> Vec<Document> {
        let collections = self.shared.collections.lock().expect("poisoned");
        collections.get(&format!("{database}.{name}")).cloned().unwrap_or_default()
    }

    pub fn seed(&self, database: &str, name: &str, document: Document) {
        let mut collections = self.shared.collections.lock().expect("poisoned");
        collections.entry(format!("{database}.{name}")).or_default().push(document);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _uri: &str) -> anyhow::Result<SharedClient> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if self.behavior.stall_connect {
            std::future::pending::<()>().await;
        }
        if !self.behavior.connect_delay.is_zero() {
            tokio::time::sleep(self.behavior.connect_delay).await;
        }
        if self.behavior.fail_connect {
            bail!("connection refused");
        }
        Ok(Arc::new(MemoryClient { behavior: self.behavior, shared: self.shared.clone() }))
    }
}

struct MemoryClient {
    behavior: Behavior,
    shared: Arc<Shared>,
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn ping(&self) -> anyhow::Result<()> {
        if self.behavior.stalled {
            std::future::pending::<()>().await;
        }
        if self.behavior.fail_ping {
            bail!("server selection timeout");
        }
        Ok(())
    }

    fn collection(&self, database: &str, name: &str) -> Collection {
        Arc::new(MemoryCollection {
            key: format!("{database}.{name}"),
            name: name.to_string(),
            stalled: self.behavior.stalled || self.behavior.stall_queries,
            shared: self.shared.clone(),
        })
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_close {
            bail!("connection reset");
        }
        Ok(())
    }
}

struct MemoryCollection {
    key: String,
    name: String,
    stalled: bool,
    shared: Arc<Shared>,
}

impl MemoryCollection {
    async fn stall(&self) {
        if self.stalled {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_all(&self) -> anyhow::Result<Vec<Document>> {
        self.stall().await;
        let collections = self.shared.collections.lock().expect("poisoned");
        Ok(collections.get(&self.key).cloned().unwrap_or_default())
    }

    async fn find_one(&self, filter: Document) -> anyhow::Result<Option<Document>> {
        self.stall().await;
        let collections = self.shared.collections.lock().expect("poisoned");
        let found = collections.get(&self.key).and_then(|docs| {
            docs.iter().find(|doc| filter.iter().all(|(k, v)| doc.get(k) == Some(v))).cloned()
        });
        Ok(found)
    }

    async fn insert_one(&self, document: Document) -> anyhow::Result<()> {
        self.stall().await;
        let mut collections = self.shared.collections.lock().expect("poisoned");
        let docs = collections.entry(self.key.clone()).or_default();
        if docs.iter().any(|d| d.get("_id").is_some() && d.get("_id") == document.get("_id")) {
            bail!("E11000 duplicate key error");
        }
        docs.push(document);
        Ok(())
    }
}
