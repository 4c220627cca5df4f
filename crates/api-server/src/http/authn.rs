use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use shared::backend::BackendError;
use tracing::warn;

use super::errors::{bad_gateway_response, unauthorized_response};
use super::observability::RequestActor;
use super::{AppState, AuthUser};

const DOCTOR_LABEL: &str = "doctor";

pub(super) async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        warn!("missing or invalid authorization header");
        return unauthorized_response();
    };

    let account = match state.accounts.verify_session(token).await {
        Ok(account) => account,
        Err(BackendError::Unauthorized { .. } | BackendError::NotFound { .. }) => {
            return unauthorized_response();
        }
        Err(err) => {
            warn!("session verification unavailable: {err}");
            return bad_gateway_response(
                "auth_unavailable",
                "Session verification is temporarily unavailable",
            );
        }
    };

    let email = Some(account.email.trim())
        .filter(|email| !email.is_empty())
        .map(ToString::to_string);
    let actor = RequestActor {
        user_id: account.id.clone(),
        is_doctor: account.has_label(DOCTOR_LABEL),
    };
    req.extensions_mut().insert(AuthUser {
        is_doctor: actor.is_doctor,
        user_id: account.id,
        name: account.name,
        email,
    });

    let mut response = next.run(req).await;
    response.extensions_mut().insert(actor);
    response
}
