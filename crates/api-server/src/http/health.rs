use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use shared::models::OkResponse;
use tracing::warn;

use super::AppState;

/// A hung backend must not hang the orchestrator's readiness check.
const STORE_PING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
struct Readiness {
    ok: bool,
    document_store: StoreStatus,
    latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum StoreStatus {
    Reachable,
    Unavailable,
    TimedOut,
}

pub(super) async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(OkResponse { ok: true }))
}

/// Ready once the document store that holds every patient record answers.
pub(super) async fn readyz(State(state): State<AppState>) -> Response {
    let started_at = Instant::now();
    let document_store = match tokio::time::timeout(STORE_PING_TIMEOUT, state.store.ping()).await
    {
        Ok(Ok(())) => StoreStatus::Reachable,
        Ok(Err(err)) => {
            warn!("document store not ready: {err}");
            StoreStatus::Unavailable
        }
        Err(_) => {
            warn!(timeout_ms = STORE_PING_TIMEOUT.as_millis() as u64, "document store ping timed out");
            StoreStatus::TimedOut
        }
    };

    let ok = document_store == StoreStatus::Reachable;
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Readiness {
        ok,
        document_store,
        latency_ms: started_at.elapsed().as_millis() as u64,
    };
    (status, Json(body)).into_response()
}
