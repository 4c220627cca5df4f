use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{Router, middleware};
use shared::backend::AccountVerifier;
use shared::llm::ChatModel;
use shared::repos::{MAX_UPLOAD_BYTES, Store};

mod appointments;
mod authn;
mod chat;
mod doctor;
mod errors;
mod forum;
mod health;
mod observability;
mod profile;
mod rate_limit;
mod readings;
mod uploads;

pub use rate_limit::RateLimiter;

/// Multipart framing on top of the largest accepted file.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub accounts: Arc<dyn AccountVerifier>,
    pub chat_model: Arc<dyn ChatModel>,
    pub rate_limiter: RateLimiter,
    pub chat_history_limit: usize,
}

#[derive(Clone, Debug)]
pub(super) struct AuthUser {
    pub(super) user_id: String,
    pub(super) name: String,
    pub(super) email: Option<String>,
    pub(super) is_doctor: bool,
}

pub fn build_router(app_state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(app_state.clone());

    let upload_routes = Router::new()
        .route(
            "/v1/profile/photo",
            put(profile::upload_photo).delete(profile::remove_photo),
        )
        .route(
            "/v1/readings/{kind}/{reading_id}/report",
            post(readings::upload_report),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    let protected_routes = Router::new()
        .route(
            "/v1/profile",
            get(profile::get_profile).put(profile::upsert_profile),
        )
        .route(
            "/v1/readings/{kind}",
            get(readings::list_readings).post(readings::create_reading),
        )
        .route(
            "/v1/readings/{kind}/{reading_id}",
            delete(readings::delete_reading),
        )
        .route(
            "/v1/appointments",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route(
            "/v1/appointments/{appointment_id}",
            put(appointments::update_appointment).delete(appointments::delete_appointment),
        )
        .route(
            "/v1/chat/sessions",
            get(chat::list_sessions).delete(chat::delete_all_history),
        )
        .route("/v1/chat/messages", post(chat::send_message))
        .route(
            "/v1/chat/sessions/{session_id}",
            get(chat::get_session).delete(chat::delete_session),
        )
        .route(
            "/v1/chat/sessions/{session_id}/messages",
            post(chat::send_session_message),
        )
        .route(
            "/v1/chat/sessions/{session_id}/stream",
            post(chat::stream_session_message),
        )
        .route(
            "/v1/forum/topics",
            get(forum::list_topics).post(forum::create_topic),
        )
        .route(
            "/v1/forum/topics/{topic_id}",
            get(forum::get_topic).delete(forum::delete_topic),
        )
        .route(
            "/v1/forum/topics/{topic_id}/posts",
            get(forum::list_posts).post(forum::create_post),
        )
        .route("/v1/forum/topics/{topic_id}/vote", put(forum::vote_topic))
        .route(
            "/v1/forum/topics/{topic_id}/score/recompute",
            post(forum::recompute_topic_score),
        )
        .route("/v1/forum/posts/{post_id}", delete(forum::delete_post))
        .route("/v1/forum/posts/{post_id}/vote", put(forum::vote_post))
        .route(
            "/v1/forum/posts/{post_id}/score/recompute",
            post(forum::recompute_post_score),
        )
        .route("/v1/doctor/patients", get(doctor::list_patients))
        .route(
            "/v1/doctor/patients/{patient_id}",
            get(doctor::patient_overview),
        )
        .merge(upload_routes)
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            rate_limit::sensitive_rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            authn::auth_middleware,
        ))
        .with_state(app_state);

    public_routes
        .merge(protected_routes)
        .layer(middleware::from_fn(
            observability::request_observability_middleware,
        ))
}
