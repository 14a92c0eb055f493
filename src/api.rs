//! Optional read-only status surface.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::info;

use crate::breaker::{BreakerRegistry, CircuitState};
use crate::ledger::{Ledger, LedgerSummary};
use crate::shutdown::Shutdown;

#[derive(Clone)]
pub struct StatusState {
    pub ledger: Arc<Ledger>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Serialize)]
struct StatusResp {
    ledger: LedgerSummary,
    providers: BTreeMap<String, CircuitState>,
}

pub fn create_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

async fn metrics(State(state): State<StatusState>) -> (StatusCode, String) {
    match &state.metrics {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn status(State(state): State<StatusState>) -> Json<StatusResp> {
    Json(StatusResp {
        ledger: state.ledger.summary(),
        providers: state.breakers.snapshot(),
    })
}

pub async fn serve(addr: SocketAddr, state: StatusState, mut shutdown: Shutdown) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind status server on {addr}"))?;
    info!(%addr, "status server listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("status server")
}
