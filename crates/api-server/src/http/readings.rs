use axum::Json;
use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use shared::models::{CreateReadingRequest, ListReadingsResponse, OkResponse, ReadingKind};

use super::errors::{bad_request_response, not_found_response, store_error_response};
use super::uploads::read_upload;
use super::{AppState, AuthUser};

#[derive(Debug, Deserialize)]
pub(super) struct ListReadingsQuery {
    limit: Option<usize>,
    cursor: Option<String>,
}

pub(super) async fn list_readings(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
    Query(query): Query<ListReadingsQuery>,
) -> Response {
    let Some(kind) = ReadingKind::from_path(&kind) else {
        return not_found_response();
    };

    match state
        .store
        .list_readings(&user.user_id, kind, query.limit, query.cursor.as_deref())
        .await
    {
        Ok(page) => (
            StatusCode::OK,
            Json(ListReadingsResponse {
                items: page.items,
                next_cursor: page.next_cursor,
            }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

/// The path decides the reading kind; the body carries only its values.
pub(super) async fn create_reading(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(kind) = ReadingKind::from_path(&kind) else {
        return not_found_response();
    };
    let req = match reading_request(kind, body) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match state.store.create_reading(&user.user_id, req, Utc::now()).await {
        Ok(reading) => (StatusCode::CREATED, Json(reading)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn delete_reading(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, reading_id)): Path<(String, String)>,
) -> Response {
    let Some(kind) = ReadingKind::from_path(&kind) else {
        return not_found_response();
    };

    match state
        .store
        .delete_reading(&user.user_id, kind, &reading_id)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn upload_report(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, reading_id)): Path<(String, String)>,
    multipart: Multipart,
) -> Response {
    if ReadingKind::from_path(&kind) != Some(ReadingKind::Bloodwork) {
        return not_found_response();
    }
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    match state
        .store
        .attach_bloodwork_report(&user.user_id, &reading_id, upload)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => store_error_response(err),
    }
}

fn reading_request(kind: ReadingKind, body: Value) -> Result<CreateReadingRequest, Response> {
    let Value::Object(mut fields) = body else {
        return Err(bad_request_response("Reading body must be a JSON object"));
    };
    if let Some(declared) = fields.get("kind").and_then(Value::as_str)
        && ReadingKind::from_path(declared) != Some(kind)
    {
        return Err(bad_request_response("Reading kind does not match the path"));
    }
    fields.insert("kind".to_string(), Value::from(kind.as_str()));

    serde_json::from_value(Value::Object(fields))
        .map_err(|err| bad_request_response(&format!("Invalid reading: {err}")))
}
