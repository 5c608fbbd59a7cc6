//! HTTP server implementation using Axum.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ivb_core::{
    broadcast::{BroadcastGuard, Broadcaster, RecipientResolver},
    config::Config,
};

/// Shared state for the broadcast server.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub resolver: RecipientResolver,
    pub broadcaster: Broadcaster,
    /// Process-wide "broadcast in progress" flag.
    pub guard: BroadcastGuard,
    /// Cancellation handle of the running job, if any.
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, resolver: RecipientResolver, broadcaster: Broadcaster) -> Self {
        Self {
            cfg,
            resolver,
            broadcaster,
            guard: BroadcastGuard::new(),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Slot holding the running job's cancellation token.
    pub fn current_job(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the running job, if any. Returns whether one was running.
    pub fn cancel_current(&self) -> bool {
        match self.current_job().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let max_upload = state.cfg.max_upload_bytes;
    let shared = Arc::new(state);

    Router::new()
        .route("/health", get(super::routes::health))
        .route("/api/broadcast", post(super::routes::start_broadcast))
        .route("/api/broadcast/status", get(super::routes::broadcast_status))
        .route("/api/broadcast/cancel", post(super::routes::cancel_broadcast))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let addr = state.cfg.http_addr;
    tokio::fs::create_dir_all(&state.cfg.upload_dir).await?;

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "broadcast server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
