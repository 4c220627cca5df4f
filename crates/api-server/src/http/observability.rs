use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use shared::models::BulkDeleteSummary;
use tracing::{info, warn};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug)]
pub(super) struct RequestContext {
    pub(super) request_id: String,
}

/// Who made the request, left on the response by the auth layer so the
/// outer log line can name the caller.
#[derive(Clone, Debug)]
pub(super) struct RequestActor {
    pub(super) user_id: String,
    pub(super) is_doctor: bool,
}

/// One log line per request: route, caller, status and what a bulk delete
/// managed to remove.
pub(super) async fn request_observability_middleware(mut req: Request, next: Next) -> Response {
    let request_id = resolve_request_id(&req);
    req.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let started_at = Instant::now();

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let actor = response.extensions().get::<RequestActor>();
    let user_id = actor.map(|actor| actor.user_id.as_str());
    let is_doctor = actor.map(|actor| actor.is_doctor);
    let status = response.status().as_u16();
    let latency_ms = started_at.elapsed().as_millis() as u64;

    match needs_attention(&response) {
        Some(Attention::ServerError) => warn!(
            request_id = %request_id,
            method = %method,
            route = %route,
            user_id,
            is_doctor,
            status,
            latency_ms,
            "request failed"
        ),
        Some(Attention::PartialDelete(summary)) => warn!(
            request_id = %request_id,
            method = %method,
            route = %route,
            user_id,
            status,
            deleted = summary.deleted,
            failed = summary.failed,
            incomplete = summary.incomplete,
            latency_ms,
            "bulk delete left documents behind"
        ),
        None => info!(
            request_id = %request_id,
            method = %method,
            route = %route,
            user_id,
            is_doctor,
            status,
            latency_ms,
            "request finished"
        ),
    }

    response
}

enum Attention {
    ServerError,
    PartialDelete(BulkDeleteSummary),
}

fn needs_attention(response: &Response) -> Option<Attention> {
    if response.status().is_server_error() {
        return Some(Attention::ServerError);
    }
    response
        .extensions()
        .get::<BulkDeleteSummary>()
        .filter(|summary| !summary.is_complete())
        .map(|summary| Attention::PartialDelete(*summary))
}

fn resolve_request_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_request_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn normalize_request_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_REQUEST_ID_LEN {
        return None;
    }

    trimmed
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.'))
        .then(|| trimmed.to_string())
}
