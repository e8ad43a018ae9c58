//! HTTP and WebSocket surface of the execution server.

mod error;
mod handlers;
mod routes;
mod state;
mod ws;

use std::future::Future;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{CompileRequest, CompileResponse, HealthResponse, IMAGES_FIELD};
pub use routes::create_router;
pub use state::AppState;

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("running server")
}
