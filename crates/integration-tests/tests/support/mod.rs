#![allow(dead_code)]

pub mod chat_model;

use std::sync::Arc;

use api_server::http::{AppState, RateLimiter, build_router};
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use shared::backend::{Account, MemoryBackend};
use shared::repos::Store;
use tower::ServiceExt;

use chat_model::ScriptedChatModel;

pub const PATIENT: &str = "mia";
pub const OTHER_PATIENT: &str = "ana";
pub const DOCTOR: &str = "dr-lee";

const MULTIPART_BOUNDARY: &str = "test-boundary-7f3a";

/// Router over the in-memory backend with three registered accounts.
/// Bearer tokens are `token-{user_id}`.
pub struct TestApp {
    pub router: axum::Router,
    pub backend: MemoryBackend,
    pub store: Store,
    pub chat_model: ScriptedChatModel,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_history_limit(500)
    }

    pub fn with_history_limit(chat_history_limit: usize) -> Self {
        let backend = MemoryBackend::new();
        register(&backend, PATIENT, "Mia Santos", &[]);
        register(&backend, OTHER_PATIENT, "Ana Ruiz", &[]);
        register(&backend, DOCTOR, "Dr. Lee", &["doctor"]);

        let store = Store::in_memory(backend.clone());
        let chat_model = ScriptedChatModel::default();
        let router = build_router(AppState {
            store: store.clone(),
            accounts: Arc::new(backend.clone()),
            chat_model: Arc::new(chat_model.clone()),
            rate_limiter: RateLimiter::default(),
            chat_history_limit,
        });

        Self {
            router,
            backend,
            store,
            chat_model,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> JsonResponse {
        send_json(&self.router, request).await
    }

    pub async fn send_raw(&self, request: Request<Body>) -> RawResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request should succeed");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should read");

        RawResponse {
            status,
            content_type,
            retry_after,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }
}

fn register(backend: &MemoryBackend, user_id: &str, name: &str, labels: &[&str]) {
    backend.register_account(
        &token_for(user_id),
        Account {
            id: user_id.to_string(),
            name: name.to_string(),
            email: format!("{user_id}@example.com"),
            labels: labels.iter().map(ToString::to_string).collect(),
        },
    );
}

pub fn token_for(user_id: &str) -> String {
    format!("token-{user_id}")
}

pub fn bearer(user_id: &str) -> String {
    format!("Bearer {}", token_for(user_id))
}

pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub struct RawResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: String,
}

pub async fn send_json(app: &axum::Router, request: Request<Body>) -> JsonResponse {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read");
    let body = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));

    JsonResponse { status, body }
}

pub fn request(
    method: Method,
    uri: &str,
    user_id: Option<&str>,
    json_body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header(header::AUTHORIZATION, bearer(user_id));
    }

    match json_body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build"),
        None => builder.body(Body::empty()).expect("request should build"),
    }
}

/// Single-part multipart body carrying `bytes` in the `file` field.
pub fn upload_request(
    method: Method,
    uri: &str,
    user_id: &str,
    content_type: &str,
    bytes: &[u8],
) -> Request<Body> {
    let mut body = format!(
        "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(user_id))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request should build")
}

pub fn error_code(body: &Value) -> Option<&str> {
    body.get("error")
        .and_then(|error| error.get("code"))
        .and_then(Value::as_str)
}

/// `(event, data)` pairs of a fully buffered SSE body.
pub fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data = serde_json::from_str::<Value>(payload.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}
