//! ==============================================================================
//! status.rs - gateway status api
//! ==============================================================================
//!
//! purpose:
//!     optional read-only http view of the aggregation store, for bench
//!     debugging without a backend. enabled by `gateway.status_bind`.
//!
//! routes:
//!     GET /api/entries   live entries, shaped like the uplink records
//!     GET /api/health    {"status":"ok","senders":N}
//!
//! ==============================================================================

use axum::{extract::State, response::Json, routing::get, Router};
use std::time::Duration;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;

use crate::clock;
use crate::domain::UplinkRecord;
use crate::store::{AggregationEntry, AggregationStore};
use crate::uplink::build_batch;

#[derive(Clone)]
struct StatusState {
    store: AggregationStore,
    stale_timeout: Duration,
}

pub fn router(store: AggregationStore, stale_timeout: Duration) -> Router {
    Router::new()
        .route("/api/entries", get(entries_handler))
        .route("/api/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(StatusState {
            store,
            stale_timeout,
        })
}

pub async fn serve(
    bind: &str,
    store: AggregationStore,
    stale_timeout: Duration,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("status api on http://{}", listener.local_addr()?);
    axum::serve(listener, router(store, stale_timeout)).await?;
    Ok(())
}

impl StatusState {
    /// entries not yet past the staleness timeout, by sender id
    fn live(&self) -> Vec<AggregationEntry> {
        let now = Instant::now();
        let mut live: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|e| !e.is_stale(now, self.stale_timeout))
            .collect();
        live.sort_by_key(|e| e.sender_id);
        live
    }
}

async fn entries_handler(State(state): State<StatusState>) -> Json<Vec<UplinkRecord>> {
    Json(build_batch(&state.live(), clock::unix_timestamp_ms()))
}

async fn health_handler(State(state): State<StatusState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "senders": state.live().len()}))
}
