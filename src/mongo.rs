use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client,
    bson::{Document, doc},
    options::{ReadPreference, SelectionCriteria},
};

use crate::db::{Collection, Connector, DocumentCollection, SharedClient, StoreClient};

/// Connects through the official driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, uri: &str) -> anyhow::Result<SharedClient> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Arc::new(MongoClient(client)))
    }
}

struct MongoClient(Client);

#[async_trait]
impl StoreClient for MongoClient {
    async fn ping(&self) -> anyhow::Result<()> {
        self.0
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await?;
        Ok(())
    }

    fn collection(&self, database: &str, name: &str) -> Collection {
        Arc::new(MongoCollection(self.0.database(database).collection::<Document>(name)))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.0.clone().shutdown().await;
        Ok(())
    }
}

struct MongoCollection(mongodb::Collection<Document>);

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn find_all(&self) -> anyhow::Result<Vec<Document>> {
        let cursor = self.0.find(doc! {}).await?;
        Ok(cursor.try_collect::<Vec<_>>().await?)
    }

    async fn find_one(&self, filter: Document) -> anyhow::Result<Option<Document>> {
        Ok(self.0.find_one(filter).await?)
    }

    async fn insert_one(&self, document: Document) -> anyhow::Result<()> {
        self.0.insert_one(document).await?;
        Ok(())
    }
}
