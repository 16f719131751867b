use axum::{extract::State, http::StatusCode, routing::post, Json};
use serde_json::json;
use std::sync::Arc;

use race_strategy::{
    config::ServerConfig, CompareRequest, CompareResponse, EngineConfig, EngineError,
    StrategyEngine, StrategyRequest, StrategyResponse,
};

// ---------- Server state ----------

#[derive(Clone)]
struct AppState {
    engine: Arc<StrategyEngine>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn to_api_error(e: EngineError) -> ApiError {
    let status = match e {
        EngineError::EmptyResultSet | EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %e, "request failed");
    (status, Json(json!({ "error": e.to_string() })))
}

// Engine work is CPU-bound; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?
        .map_err(to_api_error)
}

// ---------- Handlers ----------

async fn strategy(
    State(state): State<AppState>,
    Json(req): Json<StrategyRequest>,
) -> Result<Json<StrategyResponse>, ApiError> {
    let engine = Arc::clone(&state.engine);
    run_blocking(move || engine.generate_strategies(&req)).await.map(Json)
}

async fn compare(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<CompareResponse>, ApiError> {
    let engine = Arc::clone(&state.engine);
    run_blocking(move || engine.compare(&req)).await.map(Json)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine_cfg = EngineConfig::from_env()?;
    let server_cfg = ServerConfig::from_env();
    tracing::info!(
        models_dir = %engine_cfg.models_dir.display(),
        features = ?engine_cfg.features_path,
        mc_samples = engine_cfg.mc_samples,
        "starting strategy engine"
    );

    let state = AppState {
        engine: Arc::new(StrategyEngine::from_config(engine_cfg)?),
    };

    let app = axum::Router::new()
        .route("/api/strategy", post(strategy))
        .route("/api/compare", post(compare))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], server_cfg.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
