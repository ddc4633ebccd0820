use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use mongodb::bson::{doc, oid::ObjectId};
use tracing::{debug, error};

use crate::{
    db::{Collection, ConnectionProvider},
    error::{AppError, AppResult},
    models::{Movie, parse_movie_id},
};

pub const MOVIES_COLLECTION: &str = "movies";
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct MovieService {
    db: Arc<ConnectionProvider>,
}

impl MovieService {
    pub fn new(db: Arc<ConnectionProvider>) -> Self {
        Self { db }
    }

    /// All stored movies. An empty collection yields an empty vec.
    pub async fn list(&self) -> AppResult<Vec<Movie>> {
        let col = self.collection("list_movies").await?;

        let docs = with_deadline(col.find_all()).await.context("find movies").inspect_err(
            |err| error!(op = "list_movies", error = format!("{err:#}"), "find movies failed"),
        )?;

        let movies = docs
            .into_iter()
            .map(Movie::from_document)
            .collect::<anyhow::Result<Vec<_>>>()
            .context("decode movies")
            .inspect_err(|err| {
                error!(op = "list_movies", error = format!("{err:#}"), "decode movies failed");
            })?;

        debug!(collection = col.name(), count = movies.len(), "listed movies");
        Ok(movies)
    }

    pub async fn get_by_id(&self, raw_id: &str) -> AppResult<Movie> {
        let Some(id) = parse_movie_id(raw_id) else {
            return Err(AppError::bad_request("invalid movie ID"));
        };
        let col = self.collection("get_movie").await?;

        let found = with_deadline(col.find_one(doc! { "_id": id }))
            .await
            .context("find movie")
            .and_then(|found| {
                found.map(Movie::from_document).transpose().context("decode movie")
            })
            .inspect_err(|err| {
                error!(
                    op = "get_movie",
                    movie_id = raw_id,
                    error = format!("{err:#}"),
                    "find movie failed"
                );
            })?;

        found.ok_or_else(|| AppError::not_found("movie not found"))
    }

    /// Validates `candidate`, assigns it a fresh id and stores it.
    pub async fn create(&self, candidate: Movie) -> AppResult<Movie> {
        let details = candidate.validation_messages();
        if !details.is_empty() {
            return Err(AppError::BadRequest { message: "validation failed".to_string(), details });
        }

        let id = ObjectId::new();
        let movie = Movie { id: Some(id), ..candidate };
        let document = movie.to_document().map_err(|err| AppError::BadRequest {
            message: "invalid movie".to_string(),
            details: vec![format!("{err:#}")],
        })?;

        let col = self.collection("add_movie").await?;
        with_deadline(col.insert_one(document)).await.context("insert movie").inspect_err(
            |err| error!(op = "add_movie", error = format!("{err:#}"), "insert movie failed"),
        )?;

        debug!(movie_id = %id, "movie created");
        Ok(movie)
    }

    async fn collection(&self, op: &'static str) -> AppResult<Collection> {
        self.db.open_collection(MOVIES_COLLECTION).await.map_err(|err| {
            error!(op, error = %err, "open movies collection failed");
            AppError::Database(err)
        })
    }
}

async fn with_deadline<T>(fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    tokio::time::timeout(QUERY_TIMEOUT, fut)
        .await
        .map_err(|_| anyhow!("deadline of {QUERY_TIMEOUT:?} exceeded"))?
}
