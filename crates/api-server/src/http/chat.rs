use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{Value, json};
use shared::llm::{ChatModelRequest, assistant_instruction};
use shared::models::{
    ChatMessage, ChatRole, ChatSessionMessagesResponse, InlineImage, ListChatSessionsResponse,
    SendChatMessageRequest, SendChatMessageResponse,
};
use shared::repos::MAX_UPLOAD_BYTES;
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::{
    bad_request_response, bulk_delete_response, llm_error_response, not_found_response,
    store_error_response,
};
use super::observability::RequestContext;
use super::{AppState, AuthUser};

const MAX_MESSAGE_CHARS: usize = 4000;
const MAX_SESSION_ID_LEN: usize = 64;
/// Base64 inflates by 4/3; images share the upload size cap.
const MAX_IMAGE_BASE64_LEN: usize = MAX_UPLOAD_BYTES / 3 * 4 + 4;
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

pub(super) async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state
        .store
        .list_chat_sessions(&user.user_id, state.chat_history_limit, Utc::now())
        .await
    {
        Ok(items) => (StatusCode::OK, Json(ListChatSessionsResponse { items })).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Response {
    if !is_valid_session_id(&session_id) {
        return not_found_response();
    }

    match state
        .store
        .list_session_messages(&user.user_id, &session_id)
        .await
    {
        Ok(items) if items.is_empty() => not_found_response(),
        Ok(items) => (
            StatusCode::OK,
            Json(ChatSessionMessagesResponse { session_id, items }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Response {
    if !is_valid_session_id(&session_id) {
        return not_found_response();
    }

    match state
        .store
        .delete_chat_session(&user.user_id, &session_id)
        .await
    {
        Ok(summary) if summary.attempted() == 0 => not_found_response(),
        Ok(summary) => bulk_delete_response(summary),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn delete_all_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state.store.delete_all_chat_history(&user.user_id).await {
        Ok(summary) => bulk_delete_response(summary),
        Err(err) => store_error_response(err),
    }
}

/// Starts a new session with this message.
pub(super) async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(context): Extension<RequestContext>,
    Json(req): Json<SendChatMessageRequest>,
) -> Response {
    let session_id = Uuid::new_v4().to_string();
    send_turn(state, user, context, session_id, req).await
}

pub(super) async fn send_session_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
    Json(req): Json<SendChatMessageRequest>,
) -> Response {
    if !is_valid_session_id(&session_id) {
        return bad_request_response("Invalid session id");
    }
    send_turn(state, user, context, session_id, req).await
}

/// Same turn as [`send_session_message`], answered as `delta` events and a
/// final `done` event once the reply is stored.
pub(super) async fn stream_session_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
    Json(req): Json<SendChatMessageRequest>,
) -> Response {
    if !is_valid_session_id(&session_id) {
        return bad_request_response("Invalid session id");
    }

    let (_, model_request) = match prepare_turn(&state, &user, &session_id, req).await {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };
    let mut deltas = match state.chat_model.stream(model_request).await {
        Ok(deltas) => deltas,
        Err(err) => return llm_error_response(&err),
    };

    let store = state.store.clone();
    let user_id = user.user_id;
    let request_id = context.request_id;
    let sse_stream = async_stream::stream! {
        let mut reply = String::new();
        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) => {
                    reply.push_str(&delta);
                    yield Ok::<_, Infallible>(sse_event("delta", json!({ "text": delta })));
                }
                Err(err) => {
                    warn!(request_id = %request_id, code = err.code(), "chat stream failed: {err}");
                    yield Ok(sse_event("error", json!({ "code": "llm_unavailable" })));
                    return;
                }
            }
        }

        if reply.trim().is_empty() {
            warn!(request_id = %request_id, "chat stream ended without text");
            yield Ok(sse_event("error", json!({ "code": "llm_unavailable" })));
            return;
        }

        match store
            .append_chat_message(&user_id, &session_id, ChatRole::Assistant, &reply, Utc::now())
            .await
        {
            Ok(message) => {
                info!(request_id = %request_id, session_id = %session_id, "chat stream completed");
                yield Ok(sse_event(
                    "done",
                    json!({ "message_id": message.id, "session_id": session_id }),
                ));
            }
            Err(err) => {
                warn!(request_id = %request_id, "failed to store streamed reply: {err}");
                yield Ok(sse_event("error", json!({ "code": "internal_error" })));
            }
        }
    };

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
        .into_response()
}

async fn send_turn(
    state: AppState,
    user: AuthUser,
    context: RequestContext,
    session_id: String,
    req: SendChatMessageRequest,
) -> Response {
    let (user_message, model_request) = match prepare_turn(&state, &user, &session_id, req).await
    {
        Ok(prepared) => prepared,
        Err(response) => return response,
    };

    let reply = match state.chat_model.generate(model_request).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(request_id = %context.request_id, session_id = %session_id, "chat turn failed");
            return llm_error_response(&err);
        }
    };

    let assistant_message = match state
        .store
        .append_chat_message(
            &user.user_id,
            &session_id,
            ChatRole::Assistant,
            &reply.text,
            Utc::now(),
        )
        .await
    {
        Ok(message) => message,
        Err(err) => return store_error_response(err),
    };

    info!(
        request_id = %context.request_id,
        session_id = %session_id,
        model = %reply.model,
        "chat turn completed"
    );
    (
        StatusCode::OK,
        Json(SendChatMessageResponse {
            session_id,
            user_message,
            assistant_message,
        }),
    )
        .into_response()
}

/// Validates and stores the user message, then builds the model request
/// from the stored session history.
async fn prepare_turn(
    state: &AppState,
    user: &AuthUser,
    session_id: &str,
    req: SendChatMessageRequest,
) -> Result<(ChatMessage, ChatModelRequest), Response> {
    let text = validate_text(&req.text)?;
    if let Some(image) = &req.image {
        validate_image(image)?;
    }

    let now = Utc::now();
    let user_message = state
        .store
        .append_chat_message(&user.user_id, session_id, ChatRole::User, text, now)
        .await
        .map_err(store_error_response)?;
    let history = state
        .store
        .list_session_messages(&user.user_id, session_id)
        .await
        .map_err(store_error_response)?;

    // Pregnancy context is optional; a failed profile read only drops it.
    let gestational_week = match state.store.get_profile(&user.user_id, now.date_naive()).await {
        Ok(profile) => profile.and_then(|profile| profile.gestational_week),
        Err(err) => {
            warn!("failed to load profile for chat context: {err}");
            None
        }
    };

    let model_request =
        ChatModelRequest::from_history(assistant_instruction(gestational_week), &history, req.image);
    Ok((user_message, model_request))
}

fn validate_text(text: &str) -> Result<&str, Response> {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > MAX_MESSAGE_CHARS {
        return Err(bad_request_response(
            "Message text must be 1-4000 characters",
        ));
    }
    Ok(trimmed)
}

fn validate_image(image: &InlineImage) -> Result<(), Response> {
    if !image.mime_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(bad_request_response("Attachment must be an image"));
    }
    if image.data.is_empty() || image.data.len() > MAX_IMAGE_BASE64_LEN {
        return Err(bad_request_response("Image must be between 1 byte and 10 MiB"));
    }
    Ok(())
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'))
}

fn sse_event(name: &str, payload: Value) -> Event {
    Event::default().event(name).data(payload.to_string())
}
