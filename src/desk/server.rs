use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, response::Redirect, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::db::{DbHandle, DeskDb};
use crate::config::HelpdeskConfig;

/// Build the full application router: API routes, the root redirect and
/// request tracing. Dev mode adds permissive CORS for a separately served
/// front-end.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dev_mode = state.config.server.dev;

    let mut app = api::api_router()
        .route("/", get(|| async { Redirect::temporary("/api/tickets") }))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open (or create) the database file, creating its parent directory.
pub fn open_database(path: &Path) -> Result<DeskDb> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    DeskDb::new(path)
        .with_context(|| format!("Failed to initialize database at {}", path.display()))
}

/// Start the helpdesk server and run until Ctrl+C.
pub async fn start_server(config: HelpdeskConfig) -> Result<()> {
    let db = open_database(&config.database.path)?;
    let purged = db.purge_expired_sessions()?;
    if purged > 0 {
        info!(count = purged, "Purged expired sessions");
    }

    let addr = config.bind_addr();
    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        config,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Helpdesk listening");
    println!("Helpdesk running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
