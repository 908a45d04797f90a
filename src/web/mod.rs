//! Read-only web view of post history.
//!
//! - `GET /` - page with the newest history rows
//! - `GET /api/history?range=<offset>-<limit>` - history events, newest first
//! - `GET /api/posts?range=<offset>-<limit>` - posted urls, newest first

mod error;
mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::storage::Database;

pub use error::{ApiError, ErrorCode};
pub use handlers::{parse_range, render_index, PageBody, DEFAULT_LIMIT, MAX_LIMIT};

/// Create the router. The store is the only shared state.
pub fn create_router(db: Database) -> Router {
    let api_routes = Router::new()
        .route("/history", get(handlers::history))
        .route("/posts", get(handlers::posts));

    Router::new()
        .route("/", get(handlers::index))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(db)
}

/// Serve the web view on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, db: Database, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Web view listening");

    axum::serve(listener, create_router(db))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Web view stopped");
    Ok(())
}
