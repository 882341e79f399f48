//! Real-time fan-out server for time-boxed reveal sessions.
//!
//! Each session collects binary votes (boy/girl) and chat from anonymous
//! visitors, fans aggregate state out to every subscriber, and reveals a
//! hidden outcome at a scheduled instant.
//!
//!
//!
//! # Architecture
//!
//! - All authoritative state lives in Redis, keyed per session with a
//!   24 h TTL (1 h after the reveal). The process keeps only one piece of
//!   mutable state: the registry of active session ids.
//! - Vote dedup rides on the atomicity of a set-add: the first add per
//!   visitor wins, everything else is a duplicate. Counts therefore always
//!   equal the voter-set size, under any concurrency.
//! - Vote bursts coalesce: a vote marks its session dirty, and a periodic
//!   scheduler turns each dirty flag into at most one aggregate frame per
//!   interval. Individual vote events and chat fan out immediately.
//! - A once-per-second lifecycle tick walks active sessions through
//!   waiting -> live (5 minutes before the reveal) -> ended, archiving the
//!   final document and publishing the reveal frame exactly once.
//! - When no sessions are active both tickers return before touching
//!   Redis, so an idle process issues zero cache commands. A 60 s
//!   reconcile pass re-syncs the registry after restarts and deletes
//!   phantom ids whose session keys expired.
//!
//!
//!
//! # Surfaces
//!
//! REST: `POST /api/reveals`, `GET /api/reveals/{id}`,
//! `GET /api/session/{id}/state`, `GET /health`.
//!
//! WebSocket (`GET /ws`): clients publish to `vote/{id}` and `chat/{id}`
//! and subscribe to `votes/{id}`, `vote-events/{id}`, `chat/{id}`, and
//! `vote-response/{id}`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub mod archive;
pub mod cache;
pub mod chat;
pub mod config;
pub mod domain;
pub mod error;
pub mod publish;
pub mod ratelimit;
pub mod registry;
pub mod repository;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod vote;
pub mod ws;

#[cfg(test)]
pub(crate) mod testutil;

use archive::{ArchiveSink, DisabledArchive, HttpArchive};
use cache::RedisStore;
use config::Config;
use publish::Publisher;
use scheduler::{BroadcastScheduler, LifecycleController};
use state::AppState;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();

    info!("Connecting to Redis...");
    let store = RedisStore::connect(&config.redis_url)
        .await
        .expect("Redis misconfigured!");

    let archive: Arc<dyn ArchiveSink> = match (&config.archive_url, &config.archive_token) {
        (Some(url), Some(token)) => Arc::new(HttpArchive::new(url.clone(), token.clone())),
        _ => {
            warn!("Archive credentials not set, archival disabled");
            Arc::new(DisabledArchive)
        }
    };

    info!("Initializing state...");
    let state = AppState::new(config, Arc::new(store), archive);

    if let Err(e) = state.registry.reconcile(&state.repository).await {
        warn!("Initial reconcile failed, starting with an empty registry: {e}");
    }
    info!("Registry initialized with {} sessions", state.registry.len());

    let publisher: Arc<dyn Publisher> = Arc::new(state.hub.clone());
    let broadcast = Arc::new(BroadcastScheduler::new(
        state.repository.clone(),
        state.registry.clone(),
        publisher.clone(),
        state.config.broadcast_interval(),
    ));
    tokio::spawn(broadcast.run());

    let lifecycle = Arc::new(LifecycleController::new(
        state.repository.clone(),
        state.registry.clone(),
        publisher,
        state.archive.clone(),
    ));
    tokio::spawn(lifecycle.run());

    tokio::spawn(scheduler::run_reconciler(
        state.registry.clone(),
        state.repository.clone(),
    ));

    info!("Starting server...");

    let origins = state.config.allowed_origins();
    info!("CORS allowed origins: {origins:?}");
    let allow_origin = if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| origin.parse().ok()))
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/api/reveals", post(routes::create_reveal))
        .route("/api/reveals/{session_id}", get(routes::get_reveal))
        .route(
            "/api/session/{session_id}/state",
            get(routes::get_session_state),
        )
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
