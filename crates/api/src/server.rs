use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
};
use query::{QueryEngine, QueryResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::config::AppConfig;
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use crate::services::Services;

pub struct AppState {
    pub config: AppConfig,
    pub services: Services,
    pub data_dir: PathBuf,
    engine: RwLock<Option<Arc<QueryEngine>>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: AppConfig, services: Services, data_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            config,
            services,
            data_dir,
            engine: RwLock::new(None),
            metrics: Metrics::new(),
        })
    }

    /// Query engine over `data_dir`, loaded on first use.
    async fn engine(&self) -> anyhow::Result<Arc<QueryEngine>> {
        if let Some(engine) = self.engine.read().await.as_ref() {
            return Ok(engine.clone());
        }

        let mut slot = self.engine.write().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }
        let engine = Arc::new(
            self.services
                .query_engine(&self.config, &self.data_dir)
                .await?,
        );
        *slot = Some(engine.clone());
        Ok(engine)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/index", post(index_document))
        .route("/query", post(answer_query))
        .route("/stats", get(get_stats))
        .route("/cache", delete(clear_cache))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    llm_model: String,
    embedding_model: String,
    graph_loaded: bool,
}

#[derive(Deserialize)]
struct IndexRequest {
    /// File path or raw document text
    path: String,
    output: Option<PathBuf>,
    #[serde(default)]
    replace_pronouns: bool,
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    cache: Option<CacheStats>,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        llm_model: state.config.llm.model.clone(),
        embedding_model: state.config.embedding.model.clone(),
        graph_loaded: state.engine.read().await.is_some(),
    })
}

async fn index_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<index::BuildStats>, StatusCode> {
    let request_id = Uuid::new_v4();
    let timer = TimedOperation::start();
    let output = req.output.unwrap_or_else(|| state.data_dir.clone());
    info!(%request_id, output = ?output, "Index request");

    let result = async {
        let builder = state.services.graph_builder(&state.config)?;
        builder
            .run(&req.path, &output, req.replace_pronouns)
            .await
    }
    .await;

    match result {
        Ok(stats) => {
            state.metrics.record_request(true);
            state.metrics.record_build(timer.elapsed(), &stats);
            if output == state.data_dir {
                // Next query reloads the fresh tables
                *state.engine.write().await = None;
            }
            Ok(Json(stats))
        }
        Err(e) => {
            error!(%request_id, error = %format!("{:#}", e), "Index request failed");
            state.metrics.record_request(false);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn answer_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResult>, StatusCode> {
    let request_id = Uuid::new_v4();
    let timer = TimedOperation::start();
    info!(%request_id, question = %req.question, "Query request");

    let result = async { state.engine().await?.answer(&req.question).await }.await;

    match result {
        Ok(result) => {
            state.metrics.record_request(true);
            state.metrics.record_query(timer.elapsed());
            Ok(Json(result))
        }
        Err(e) => {
            error!(%request_id, error = %format!("{:#}", e), "Query request failed");
            state.metrics.record_request(false);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cache: state.services.cache.as_ref().map(|c| c.stats()),
    })
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    if let Some(cache) = &state.services.cache {
        cache.clear();
        info!("Embedding cache cleared");
    }
    StatusCode::NO_CONTENT
}
