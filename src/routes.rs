use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::{
    AppState,
    db::ProviderState,
    error::{AppError, AppResult},
    models::Movie,
};

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/hello", get(hello))
        .route("/health", get(health))
        .route("/movies", get(list_movies))
        .route("/movies/{id}", get(get_movie))
        .route("/addmovies", post(add_movie));

    Router::new().nest("/api", api).with_state(state)
}

pub async fn hello() -> Json<Value> {
    Json(json!({ "message": "hello" }))
}

/// Reports the storage client state without triggering a connection attempt.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db = state.db.state();
    let status = match db {
        ProviderState::Failed(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    let mut body = json!({ "database": db.as_str() });
    if let ProviderState::Failed(err) = &db {
        body["error"] = json!(err.to_string());
    }
    (status, Json(body))
}

pub async fn list_movies(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Movie>>> {
    Ok(Json(state.movies.list().await?))
}

pub async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Movie>> {
    Ok(Json(state.movies.get_by_id(&id).await?))
}

pub async fn add_movie(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Movie>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Movie>)> {
    let candidate = extract_json(body)?;
    let movie = state.movies.create(candidate).await?;
    Ok((StatusCode::CREATED, Json(movie)))
}

/// Undecodable bodies become problem responses like any other bad request.
fn extract_json<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value).map_err(|rejection| AppError::BadRequest {
        message: "invalid request body".to_string(),
        details: vec![rejection.body_text()],
    })
}
