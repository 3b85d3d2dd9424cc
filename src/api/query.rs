use axum::{
    extract::{Query as QueryParams, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    config::Config,
    engine::QueryEngine,
    environment::Environment,
    metric_query::parse_sub_query,
    metrics::{self, RequestTimer},
    models::{QueryRequest, TimeSpec},
    series::Series,
    Result,
    SplicerError,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: QueryEngine,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(env: Environment) -> Self {
        Self {
            config: env.config.clone(),
            engine: QueryEngine::new(env),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/query", get(query_get).post(query_post))
        .route("/api/query/query", get(query_get).post(query_post))
        .route("/api/query/qexp", get(query_get).post(query_post))
        .route("/api/config", get(get_config))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Builds a request from `start`, `end`, `padding`, `ms`, repeated `m`
/// metric queries and repeated `x` expressions.
fn request_from_params(params: Vec<(String, String)>) -> Result<QueryRequest> {
    let mut request = QueryRequest::default();
    for (key, value) in params {
        match key.as_str() {
            "start" => request.start = Some(TimeSpec::Text(value)),
            "end" => request.end = Some(TimeSpec::Text(value)),
            "padding" => request.padding = flag(&value),
            "ms" => request.ms_resolution = flag(&value),
            "m" => request.queries.push(parse_sub_query(&value)?),
            "x" => request.expressions.push(value),
            _ => {}
        }
    }
    Ok(request)
}

/// A bare `?ms` counts as set.
fn flag(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("true")
}

async fn query_get(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<Vec<(String, String)>>,
) -> Result<Json<Vec<Series>>> {
    let request = request_from_params(params)?;
    execute(&state, request).await
}

async fn query_post(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Vec<Series>>> {
    execute(&state, request).await
}

async fn execute(state: &AppState, request: QueryRequest) -> Result<Json<Vec<Series>>> {
    let _timer = RequestTimer::new();
    let query_id = Uuid::new_v4();

    let now = chrono::Utc::now().timestamp_millis();
    let query = request.to_query(now)?;
    info!(
        "Query {}: [{}, {}] with {} sub queries and {} expressions",
        query_id,
        query.range.start,
        query.range.end,
        query.sub_queries.len(),
        request.expressions.len()
    );

    let result = if request.expressions.is_empty() {
        state.engine.run_query(&query).await
    } else {
        state.engine.run_expressions(&query, &request.expressions).await
    };

    match result {
        Ok(series) => {
            info!("Query {} returned {} series", query_id, series.len());
            Ok(Json(series))
        }
        Err(e) => {
            error!("Query {} failed: {}", query_id, e);
            Err(e)
        }
    }
}

async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(state.config.as_ref().clone())
}

async fn get_metrics() -> String {
    metrics::gather_text()
}

pub async fn start_server(env: Environment) -> Result<()> {
    let addr = format!("0.0.0.0:{}", env.config.port);
    let app = router(AppState::new(env));
    info!("Starting splicer on {}", addr);

    let listener = TcpListener::bind(&addr).await.map_err(|e|
        SplicerError::Internal(format!("Failed to bind to address: {}", e)))?;

    axum::serve(listener, app).await.map_err(|e|
        SplicerError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
