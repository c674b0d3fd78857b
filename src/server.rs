use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;

use crate::error::Result;
use crate::status::{RunState, Status};
use crate::summary::Summary;

/// Pushes on the SSE stream are this far apart.
const STREAM_TICK: Duration = Duration::from_millis(500);

/// Builds the read-only status API for one run.
pub fn create_router(state: Arc<RunState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/metrics", get(get_metrics))
        .route("/api/metrics/stream", get(metrics_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Binds `addr` and serves until the process exits.
pub async fn serve(addr: SocketAddr, state: Arc<RunState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "status API listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

// ─── GET /api/status ─────────────────────────────────────────────

async fn get_status(State(state): State<Arc<RunState>>) -> Json<Status> {
    Json(state.status())
}

// ─── GET /api/metrics ────────────────────────────────────────────

async fn get_metrics(State(state): State<Arc<RunState>>) -> Json<Summary> {
    Json(state.summary())
}

// ─── GET /api/metrics/stream ─────────────────────────────────────

/// One summary as JSON every 500 ms.
async fn metrics_stream(
    State(state): State<Arc<RunState>>,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = IntervalStream::new(tokio::time::interval(STREAM_TICK)).map(move |_| {
        let json = serde_json::to_string(&state.summary()).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
