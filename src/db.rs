use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use mongodb::bson::Document;
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

pub type Collection = Arc<dyn DocumentCollection>;
pub type SharedClient = Arc<dyn StoreClient>;

/// Opens clients against a storage backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, uri: &str) -> anyhow::Result<SharedClient>;
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Round trip against the primary node.
    async fn ping(&self) -> anyhow::Result<()>;

    fn collection(&self, database: &str, name: &str) -> Collection;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    async fn find_all(&self) -> anyhow::Result<Vec<Document>>;

    /// First document whose fields equal every entry of `filter`.
    async fn find_one(&self, filter: Document) -> anyhow::Result<Option<Document>>;

    async fn insert_one(&self, document: Document) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum DbError {
    #[error("{0} is not set")]
    MissingSetting(&'static str),
    #[error("collection name is required")]
    EmptyCollectionName,
    #[error("connect mongo: {0:#}")]
    Connect(Arc<anyhow::Error>),
    #[error("connect mongo: no client within {0:?}")]
    ConnectTimeout(Duration),
    #[error("ping mongo: {0:#}")]
    Ping(Arc<anyhow::Error>),
    #[error("ping mongo: no reply within {0:?}")]
    PingTimeout(Duration),
}

impl DbError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, DbError::MissingSetting(_) | DbError::EmptyCollectionName)
    }
}

#[derive(Clone, Debug)]
pub enum ProviderState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(DbError),
}

impl ProviderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Uninitialized => "uninitialized",
            ProviderState::Initializing => "initializing",
            ProviderState::Ready => "ready",
            ProviderState::Failed(_) => "failed",
        }
    }
}

/// Owns the one client shared by every request.
///
/// The connect-and-ping sequence runs at most once, on a task of its own so that a
/// caller giving up does not abandon it. Concurrent first callers wait on the same
/// attempt, and its outcome (client or error) is returned to every caller for the rest
/// of the provider's life. A failed attempt is never retried.
pub struct ConnectionProvider {
    connector: Arc<dyn Connector>,
    uri: Option<String>,
    database: Option<String>,
    started: AtomicBool,
    outcome: Arc<OnceCell<Result<SharedClient, DbError>>>,
    settled: Arc<Notify>,
}

impl fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("database", &self.database)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionProvider {
    pub fn new(
        connector: impl Connector + 'static,
        uri: Option<String>,
        database: Option<String>,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            uri,
            database,
            started: AtomicBool::new(false),
            outcome: Arc::new(OnceCell::new()),
            settled: Arc::new(Notify::new()),
        }
    }

    pub async fn acquire_client(&self) -> Result<SharedClient, DbError> {
        loop {
            // registered before the check so a completion in between still wakes us
            let settled = self.settled.notified();
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            self.start();
            settled.await;
        }
    }

    pub async fn open_collection(&self, name: &str) -> Result<Collection, DbError> {
        if name.is_empty() {
            return Err(DbError::EmptyCollectionName);
        }
        let Some(database) = self.database.as_deref().filter(|d| !d.is_empty()) else {
            return Err(DbError::MissingSetting("DATABASE_NAME"));
        };

        let client = self.acquire_client().await?;
        Ok(client.collection(database, name))
    }

    /// Closes the client if one was ever established.
    pub async fn release(&self) -> anyhow::Result<()> {
        let Some(Ok(client)) = self.outcome.get() else {
            return Ok(());
        };
        client.close().await.context("disconnect mongo")?;
        info!("storage client closed");
        Ok(())
    }

    pub fn state(&self) -> ProviderState {
        match self.outcome.get() {
            Some(Ok(_)) => ProviderState::Ready,
            Some(Err(err)) => ProviderState::Failed(err.clone()),
            None if self.started.load(Ordering::Acquire) => ProviderState::Initializing,
            None => ProviderState::Uninitialized,
        }
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let connector = self.connector.clone();
        let uri = self.uri.clone();
        let database = self.database.clone();
        let outcome = self.outcome.clone();
        let settled = self.settled.clone();

        tokio::spawn(async move {
            let attempt = tokio::spawn(async move {
                connect_and_ping(connector.as_ref(), uri.as_deref()).await
            });
            let result = attempt.await.unwrap_or_else(|err| {
                Err(DbError::Connect(Arc::new(anyhow!("initialization task failed: {err}"))))
            });

            match &result {
                Ok(_) => info!(?database, "connected to mongo"),
                Err(err) => warn!(error = %err, "mongo initialization failed, not retrying"),
            }
            if outcome.set(result).is_err() {
                debug!("initialization outcome already recorded");
            }
            settled.notify_waiters();
        });
    }
}

async fn connect_and_ping(
    connector: &dyn Connector,
    uri: Option<&str>,
) -> Result<SharedClient, DbError> {
    let Some(uri) = uri.filter(|u| !u.is_empty()) else {
        return Err(DbError::MissingSetting("MONGODB_URI"));
    };

    debug!("connecting to mongo");
    let client = match tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(uri)).await {
        Ok(Ok(client)) => client,
        Ok(Err(e)) => return Err(DbError::Connect(Arc::new(e))),
        Err(_) => return Err(DbError::ConnectTimeout(CONNECT_TIMEOUT)),
    };

    let err = match tokio::time::timeout(PING_TIMEOUT, client.ping()).await {
        Ok(Ok(())) => return Ok(client),
        Ok(Err(e)) => DbError::Ping(Arc::new(e)),
        Err(_) => DbError::PingTimeout(PING_TIMEOUT),
    };

    if let Err(close_err) = client.close().await {
        debug!(error = %close_err, "closing unreachable client failed");
    }
    Err(err)
}
