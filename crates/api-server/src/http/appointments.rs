use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use shared::models::{CreateAppointmentRequest, OkResponse, UpdateAppointmentRequest};

use super::errors::store_error_response;
use super::{AppState, AuthUser};

pub(super) async fn list_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state
        .store
        .list_appointments(&user.user_id, Utc::now())
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn create_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateAppointmentRequest>,
) -> Response {
    match state.store.create_appointment(&user.user_id, &req).await {
        Ok(appointment) => (StatusCode::CREATED, Json(appointment)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn update_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(appointment_id): Path<String>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Response {
    match state
        .store
        .update_appointment(&user.user_id, &appointment_id, &req)
        .await
    {
        Ok(appointment) => (StatusCode::OK, Json(appointment)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn delete_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(appointment_id): Path<String>,
) -> Response {
    match state
        .store
        .delete_appointment(&user.user_id, &appointment_id)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => store_error_response(err),
    }
}
