//! GenMedia Arena API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Arena rounds and votes
//! - Leaderboards and vote history
//! - Ad hoc multi-model generation
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

#[cfg(test)]
mod tests;

use axum::{
    body::Body,
    http::Request,
    routing::{get, post},
    Router,
};
use genmedia_arena_common::{
    arena::ArenaService,
    auth::create_token_provider,
    config::AppConfig,
    db::create_store,
    errors::Result,
    generation::{create_registry, ImageSink},
    metrics::{self, GENERATION_BUCKETS, LATENCY_BUCKETS},
    prompts::PromptManager,
    storage::create_object_store,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub arena: Arc<ArenaService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config);

    info!(
        service = %config.observability.service_name,
        "Starting GenMedia Arena Gateway v{}",
        genmedia_arena_common::VERSION
    );

    // Initialize metrics
    init_metrics(&config)?;

    let config = Arc::new(config);
    let state = build_state(config.clone()).await?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            })
            .await
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline(shutdown_rx, config.shutdown_timeout()) => {
            warn!(
                timeout_secs = config.server.shutdown_timeout_secs,
                "Connections still open after shutdown timeout, exiting"
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

fn init_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let port = config.observability.metrics_port;
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", metrics::METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("generation_duration_seconds".to_string()),
            GENERATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("dispatch_duration_seconds".to_string()),
            GENERATION_BUCKETS,
        )?
        .install()?;

    metrics::register_metrics();
    info!(port = port, "Prometheus exporter listening");
    Ok(())
}

/// Wire the store, object storage, model registry and arena service
pub async fn build_state(config: Arc<AppConfig>) -> Result<AppState> {
    let store = create_store(&config).await?;
    let tokens = create_token_provider(&config.gcp)?;

    let bucket = config.storage.bucket.clone().unwrap_or_default();
    let objects = create_object_store(&config.storage, &bucket, tokens.clone())?;

    let sink = ImageSink::new(objects, store.clone());
    let registry = create_registry(&config, sink, tokens)?;
    let prompts = PromptManager::load(&config.arena.prompts_path).await;

    let arena = ArenaService::new(
        store,
        registry,
        prompts,
        config.arena.clone(),
        &config.generation.aspect_ratio,
    );

    Ok(AppState {
        config,
        arena: Arc::new(arena),
    })
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = TimeoutLayer::new(state.config.request_timeout());
    let service = state.config.observability.service_name.clone();

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Arena endpoints
        .route("/arena/welcome", get(handlers::arena::welcome))
        .route("/arena/prompt", get(handlers::arena::random_prompt))
        .route("/arena/round", post(handlers::arena::new_round))
        .route("/arena/vote", post(handlers::arena::vote))

        // Results
        .route("/leaderboard", get(handlers::results::leaderboard))
        .route("/history", get(handlers::results::history))
        .route("/studies", get(handlers::results::studies))

        // Ad hoc generation
        .route("/generate", post(handlers::generate::generate));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
            tracing::info_span!(
                "request",
                service = %service,
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .layer(timeout)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Resolves `timeout` after shutdown starts; never resolves before that
async fn drain_deadline(mut started: watch::Receiver<bool>, timeout: Duration) {
    if started.wait_for(|started| *started).await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(timeout).await;
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
