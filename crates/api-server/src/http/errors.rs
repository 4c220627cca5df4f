use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use shared::llm::LlmGatewayError;
use shared::models::{BulkDeleteSummary, ErrorBody, ErrorResponse};
use shared::repos::StoreError;
use tracing::{error, warn};

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
        .into_response()
}

pub(super) fn bad_request_response(message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
}

pub(super) fn not_found_response() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", "Resource not found")
}

pub(super) fn forbidden_response(message: &str) -> Response {
    error_response(StatusCode::FORBIDDEN, "forbidden", message)
}

pub(super) fn bad_gateway_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::BAD_GATEWAY, code, message)
}

pub(super) fn unauthorized_response() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Missing or invalid bearer token",
    )
}

pub(super) fn too_many_requests_response(retry_after_seconds: u64) -> Response {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "Too many requests; retry later",
    );

    if let Ok(retry_after_value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, retry_after_value);
    }

    response
}

pub(super) fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound => not_found_response(),
        StoreError::Backend(ref backend) if backend.is_not_found() => not_found_response(),
        StoreError::Forbidden => forbidden_response("Only the author may do this"),
        StoreError::Validation(message) => bad_request_response(&message),
        other => {
            error!("backend operation failed: {other}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Unexpected server error",
            )
        }
    }
}

pub(super) fn llm_error_response(err: &LlmGatewayError) -> Response {
    warn!(code = err.code(), "chat model request failed: {err}");
    let message = match err {
        LlmGatewayError::Blocked(_) => "The assistant could not answer this message",
        _ => "The assistant is unavailable; try again later",
    };
    bad_gateway_response("llm_unavailable", message)
}

/// 200 when every document went away, 207 with the counts otherwise.
pub(super) fn bulk_delete_response(summary: BulkDeleteSummary) -> Response {
    let status = if summary.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    let mut response = (status, Json(summary)).into_response();
    // Read back by the request log middleware.
    response.extensions_mut().insert(summary);
    response
}
