use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use shared::models::ListPatientsResponse;
use tracing::warn;

use super::errors::{forbidden_response, store_error_response};
use super::{AppState, AuthUser};

pub(super) async fn list_patients(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    if let Some(response) = require_doctor(&user) {
        return response;
    }

    match state.store.list_patients(&user.user_id, Utc::now()).await {
        Ok(items) => (StatusCode::OK, Json(ListPatientsResponse { items })).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn patient_overview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(patient_id): Path<String>,
) -> Response {
    if let Some(response) = require_doctor(&user) {
        return response;
    }

    match state
        .store
        .patient_overview(&user.user_id, &patient_id, Utc::now())
        .await
    {
        Ok(overview) => (StatusCode::OK, Json(overview)).into_response(),
        Err(err) => store_error_response(err),
    }
}

fn require_doctor(user: &AuthUser) -> Option<Response> {
    if user.is_doctor {
        return None;
    }
    warn!(user_id = %user.user_id, "non-doctor account requested the doctor dashboard");
    Some(forbidden_response("Doctor account required"))
}
