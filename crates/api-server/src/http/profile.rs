use axum::Json;
use axum::extract::{Extension, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use shared::models::{OkResponse, UpsertProfileRequest};

use super::errors::{not_found_response, store_error_response};
use super::uploads::read_upload;
use super::{AppState, AuthUser};

pub(super) async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state
        .store
        .get_profile(&user.user_id, Utc::now().date_naive())
        .await
    {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile)).into_response(),
        Ok(None) => not_found_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn upsert_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpsertProfileRequest>,
) -> Response {
    match state
        .store
        .upsert_profile(
            &user.user_id,
            user.email.as_deref(),
            &req,
            Utc::now().date_naive(),
        )
        .await
    {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn upload_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    match state.store.set_profile_photo(&user.user_id, upload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn remove_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state.store.remove_profile_photo(&user.user_id).await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => store_error_response(err),
    }
}
