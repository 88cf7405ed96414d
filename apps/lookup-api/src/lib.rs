use anyhow::Context;
use axum::{
    Router,
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use key_resolver::redis_store::redact_url;
use key_resolver::{KeyStore, RedisStore, Resolution, ResolveError, StoreError, resolve};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::field::Empty;
use tracing::{Span, error, info, instrument, warn};

// Expose modules for use in main.rs and tests
pub mod config;
pub mod metrics;
pub mod open_telemetry;

pub use config::{Config, RedisSettings, load_config};
use metrics::Metrics;

/// Collections reachable through `GET /{collection}`
pub const ALLOWED_COLLECTIONS: [&str; 4] = ["institutions", "companies", "roles", "degrees"];

pub struct AppState<S> {
    /// `None` when no client could be built from the configured URL
    pub store: Option<Arc<S>>,
    pub metrics: Arc<Metrics>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(store: Option<Arc<S>>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    fn store(&self) -> Result<&S, ApiError> {
        self.store.as_deref().ok_or(ApiError::StoreUnavailable)
    }
}

// --- Errors ---

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Redis client not initialized")]
    StoreUnavailable,

    #[error("collection not found")]
    CollectionNotFound,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::CollectionNotFound => StatusCode::NOT_FOUND,
            Self::StoreUnavailable | Self::Resolve(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

// --- Request DTOs ---

#[derive(Deserialize, Debug)]
pub struct KeysQuery {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

// --- Store Connection ---

/// Build the store and ping it once. Connecting is lazy, so an unreachable
/// server only logs a warning and is retried by later requests. `None` means
/// the URL itself is unusable.
pub async fn connect_store(config: &Config) -> Option<Arc<RedisStore>> {
    info!(url = %redact_url(&config.redis_url), "Connecting to Redis");

    let store = match RedisStore::open(&config.redis_url, config.redis_timeout) {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Redis URL rejected, continuing without a client");
            return None;
        }
    };

    if let Err(e) = store.ping().await {
        warn!(error = %e, "Redis ping failed at startup, will retry on demand");
    }

    Some(Arc::new(store))
}

// --- Router Setup ---

pub fn create_app<S: KeyStore + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/version", get(version_handler))
        .route("/keys", get(list_keys_handler::<S>))
        .route("/key/:name", get(get_key_handler::<S>))
        // Static routes above take precedence over the collection catch-all
        .route("/:collection", get(collection_handler::<S>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server Lifecycle ---

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize observability
    open_telemetry::init_tracing().context("Failed to initialize tracing")?;
    let (meter_provider, metrics) =
        metrics::init_metrics().context("Failed to initialize metrics")?;

    info!("Starting lookup API...");

    let config = load_config();
    let store = connect_store(&config).await;

    let state = AppState::new(store.clone(), Arc::new(metrics));
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .context("Failed to bind port")?;

    info!(addr = %config.listen_addr, "Listening for requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(store) = store {
        store.close().await;
    }

    if let Err(e) = meter_provider.shutdown() {
        error!(error = %e, "Failed to shutdown meter provider");
    }
    opentelemetry::global::shutdown_tracer_provider();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Signal received, starting graceful shutdown");
}

// --- Request Handlers ---

/// Resolve `key`, recording the winning probe on the current span and in metrics
async fn lookup<S: KeyStore>(
    state: &AppState<S>,
    route: &'static str,
    key: &str,
) -> Result<(Resolution, Duration), ApiError> {
    let store = state.store()?;

    let start = Instant::now();
    let result = resolve(store, key).await;
    let elapsed = start.elapsed();

    let resolution = result.inspect_err(|e| {
        error!(error = %e, "Key resolution failed");
        state.metrics.record_store_error("resolve");
    })?;

    let span = Span::current();
    span.record(
        "strategy",
        resolution.strategy.map(|s| s.as_str()).unwrap_or("exhausted"),
    );
    span.record("count", resolution.count());
    state
        .metrics
        .record_resolution(route, resolution.strategy, elapsed);

    Ok((resolution, elapsed))
}

/// List key names matching a glob pattern
#[instrument(skip(state))]
async fn list_keys_handler<S: KeyStore + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<Value>, ApiError> {
    let store = state.store()?;

    let keys = store.list_keys(&query.pattern).await.map_err(|e| {
        error!(error = %e, kind = e.kind(), "Key listing failed");
        state.metrics.record_store_error("list_keys");
        ApiError::from(e)
    })?;

    Ok(Json(json!({
        "count": keys.len(),
        "keys": keys,
    })))
}

/// Resolve an arbitrary key
#[instrument(skip(state), fields(strategy = Empty, count = Empty))]
async fn get_key_handler<S: KeyStore + 'static>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (resolution, _) = lookup(&state, "key", &name).await?;

    Ok(Json(json!({
        "key": name,
        "count": resolution.count(),
        "items": resolution.value.into_json(),
    })))
}

/// Resolve one of the fixed collections, reporting server-side resolve time
#[instrument(skip(state), fields(strategy = Empty, count = Empty))]
async fn collection_handler<S: KeyStore + 'static>(
    State(state): State<AppState<S>>,
    Path(collection): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !ALLOWED_COLLECTIONS.contains(&collection.as_str()) {
        return Err(ApiError::CollectionNotFound);
    }

    let (resolution, elapsed) = lookup(&state, "collection", &collection).await?;

    Ok(Json(json!({
        "count": resolution.count(),
        "items": resolution.value.into_json(),
        "serverTimeMs": elapsed.as_millis() as u64,
    })))
}

async fn health_handler<S: KeyStore + 'static>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let store_ok = match state.store.as_deref() {
        Some(store) => store.ping().await.is_ok(),
        None => false,
    };

    let status = if store_ok { "healthy" } else { "degraded" };

    Json(json!({
        "status": status,
        "store": store_ok,
    }))
}

async fn version_handler() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "lookup-api",
    }))
}
