use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shared::models::{
    CastVoteRequest, CreatePostRequest, CreateTopicRequest, ListPostsResponse, ListTopicsResponse,
    TopicDetailResponse, TopicSort, VoteResponse, VoteTargetKind,
};
use shared::repos::ForumAuthor;

use super::errors::{bulk_delete_response, store_error_response};
use super::{AppState, AuthUser};

const ANONYMOUS_AUTHOR: &str = "Anonymous";

#[derive(Debug, Deserialize)]
pub(super) struct ListTopicsQuery {
    #[serde(default)]
    sort: TopicSort,
    category: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListPostsQuery {
    limit: Option<usize>,
    cursor: Option<String>,
}

pub(super) async fn list_topics(
    State(state): State<AppState>,
    Query(query): Query<ListTopicsQuery>,
) -> Response {
    match state
        .store
        .list_topics(
            query.sort,
            query.category.as_deref(),
            query.limit,
            query.cursor.as_deref(),
        )
        .await
    {
        Ok(page) => (
            StatusCode::OK,
            Json(ListTopicsResponse {
                items: page.items,
                next_cursor: page.next_cursor,
            }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn create_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateTopicRequest>,
) -> Response {
    match state.store.create_topic(&forum_author(&user), &req).await {
        Ok(topic) => (StatusCode::CREATED, Json(topic)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn get_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Response {
    let topic = match state.store.get_topic(&topic_id).await {
        Ok(topic) => topic,
        Err(err) => return store_error_response(err),
    };

    match state
        .store
        .user_vote(&user.user_id, VoteTargetKind::Topic, &topic_id)
        .await
    {
        Ok(user_vote) => {
            (StatusCode::OK, Json(TopicDetailResponse { topic, user_vote })).into_response()
        }
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn delete_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Response {
    match state.store.delete_topic(&user.user_id, &topic_id).await {
        Ok(summary) => bulk_delete_response(summary),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn list_posts(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
    Query(query): Query<ListPostsQuery>,
) -> Response {
    match state
        .store
        .list_posts(&topic_id, query.limit, query.cursor.as_deref())
        .await
    {
        Ok(page) => (
            StatusCode::OK,
            Json(ListPostsResponse {
                items: page.items,
                next_cursor: page.next_cursor,
            }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(req): Json<CreatePostRequest>,
) -> Response {
    match state
        .store
        .create_post(&forum_author(&user), &topic_id, &req)
        .await
    {
        Ok(post) => (StatusCode::CREATED, Json(post)).into_response(),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn delete_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(post_id): Path<String>,
) -> Response {
    match state.store.delete_post(&user.user_id, &post_id).await {
        Ok(summary) => bulk_delete_response(summary),
        Err(err) => store_error_response(err),
    }
}

pub(super) async fn vote_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(req): Json<CastVoteRequest>,
) -> Response {
    cast_vote(state, user, VoteTargetKind::Topic, topic_id, req).await
}

pub(super) async fn vote_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(post_id): Path<String>,
    Json(req): Json<CastVoteRequest>,
) -> Response {
    cast_vote(state, user, VoteTargetKind::Post, post_id, req).await
}

pub(super) async fn recompute_topic_score(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Response {
    recompute_score(state, user, VoteTargetKind::Topic, topic_id).await
}

pub(super) async fn recompute_post_score(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(post_id): Path<String>,
) -> Response {
    recompute_score(state, user, VoteTargetKind::Post, post_id).await
}

async fn cast_vote(
    state: AppState,
    user: AuthUser,
    kind: VoteTargetKind,
    target_id: String,
    req: CastVoteRequest,
) -> Response {
    match state
        .store
        .cast_vote(&user.user_id, kind, &target_id, req.direction)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn recompute_score(
    state: AppState,
    user: AuthUser,
    kind: VoteTargetKind,
    target_id: String,
) -> Response {
    let score = match state.store.recompute_score(kind, &target_id).await {
        Ok(score) => score,
        Err(err) => return store_error_response(err),
    };

    match state.store.user_vote(&user.user_id, kind, &target_id).await {
        Ok(user_vote) => (
            StatusCode::OK,
            Json(VoteResponse {
                target_id,
                target_kind: kind,
                score,
                user_vote,
            }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

fn forum_author(user: &AuthUser) -> ForumAuthor {
    let name = user.name.trim();
    ForumAuthor {
        id: user.user_id.clone(),
        name: if name.is_empty() {
            ANONYMOUS_AUTHOR.to_string()
        } else {
            name.to_string()
        },
    }
}
