use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Page, Store, StoreError, clamp_page_size, decode_document, into_map};
use crate::backend::{Document, MAX_PAGE_SIZE, Permission, Query};
use crate::models::{
    BulkDeleteSummary, CreatePostRequest, CreateTopicRequest, Post, Topic, TopicSort,
    VoteDirection, VoteResponse, VoteTargetKind,
};

const MAX_TITLE_CHARS: usize = 200;
const MAX_TOPIC_BODY_CHARS: usize = 10_000;
const MAX_POST_BODY_CHARS: usize = 5_000;
const MAX_CATEGORY_CHARS: usize = 50;

const VOTE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x3b9f_52c1_7d4e_4a8b_9e21_c60d_85f7_a4e3);

#[derive(Debug, Clone)]
pub struct ForumAuthor {
    pub id: String,
    pub name: String,
}

/// Outcome of one score reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub topics: usize,
    pub posts: usize,
    pub corrected: usize,
    pub failed: usize,
}

/// Score change for moving a user's vote from `previous` to `next`.
pub fn vote_delta(previous: Option<VoteDirection>, next: Option<VoteDirection>) -> i64 {
    fn weight(direction: Option<VoteDirection>) -> i64 {
        match direction {
            Some(VoteDirection::Up) => 1,
            Some(VoteDirection::Down) => -1,
            None => 0,
        }
    }
    weight(next) - weight(previous)
}

impl Store {
    pub async fn create_topic(
        &self,
        author: &ForumAuthor,
        request: &CreateTopicRequest,
    ) -> Result<Topic, StoreError> {
        let title = request.title.trim();
        if !(3..=MAX_TITLE_CHARS).contains(&title.chars().count()) {
            return Err(StoreError::validation("title must be 3-200 characters"));
        }
        let body = require_body(&request.body, MAX_TOPIC_BODY_CHARS)?;
        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty());
        if category.is_some_and(|category| category.chars().count() > MAX_CATEGORY_CHARS) {
            return Err(StoreError::validation("category must be at most 50 characters"));
        }

        let data = json!({
            "author_id": author.id,
            "author_name": author.name,
            "title": title,
            "body": body,
            "category": category,
            "score": 0,
            "post_count": 0,
        });
        let document = self
            .documents
            .create_document(
                &self.collections.forum_topics,
                None,
                into_map(data),
                &Permission::shared_with_users(&author.id),
            )
            .await?;
        decode_document(&document)
    }

    pub async fn list_topics(
        &self,
        sort: TopicSort,
        category: Option<&str>,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Page<Topic>, StoreError> {
        let limit = clamp_page_size(limit);
        let mut queries = Vec::new();
        if let Some(category) = category.map(str::trim).filter(|value| !value.is_empty()) {
            queries.push(Query::equal("category", category));
        }
        if sort == TopicSort::Top {
            queries.push(Query::order_desc("score"));
        }
        queries.push(Query::order_desc("$createdAt"));
        queries.push(Query::limit(limit));

        let page = self
            .list_after_cursor(&self.collections.forum_topics, queries, cursor)
            .await?;
        let items = page
            .documents
            .iter()
            .map(decode_document::<Topic>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::from_documents(&page.documents, limit, items))
    }

    pub async fn get_topic(&self, topic_id: &str) -> Result<Topic, StoreError> {
        let document = self
            .get_optional(&self.collections.forum_topics, topic_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        decode_document(&document)
    }

    /// Deletes a topic, then its posts, then every vote on either.
    pub async fn delete_topic(
        &self,
        user_id: &str,
        topic_id: &str,
    ) -> Result<BulkDeleteSummary, StoreError> {
        let topics = &self.collections.forum_topics;
        let document = self
            .get_optional(topics, topic_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if author_of(&document) != Some(user_id) {
            return Err(StoreError::Forbidden);
        }

        let posts = &self.collections.forum_posts;
        let post_filter = [Query::equal("topic_id", topic_id)];
        let post_ids = self
            .list_all(posts, &post_filter)
            .await?
            .into_iter()
            .map(|post| Value::String(post.id))
            .collect::<Vec<_>>();

        self.documents.delete_document(topics, topic_id).await?;
        let mut summary = BulkDeleteSummary {
            deleted: 1,
            ..BulkDeleteSummary::default()
        };
        self.delete_dependents(posts, &post_filter, &mut summary)
            .await;

        let mut vote_targets = vec![Value::String(topic_id.to_string())];
        vote_targets.extend(post_ids);
        for targets in vote_targets.chunks(MAX_PAGE_SIZE) {
            self.delete_dependents(
                &self.collections.forum_votes,
                &[Query::equal_any("target_id", targets.to_vec())],
                &mut summary,
            )
            .await;
        }

        Ok(summary)
    }

    pub async fn create_post(
        &self,
        author: &ForumAuthor,
        topic_id: &str,
        request: &CreatePostRequest,
    ) -> Result<Post, StoreError> {
        let body = require_body(&request.body, MAX_POST_BODY_CHARS)?;
        let topics = &self.collections.forum_topics;
        self.get_optional(topics, topic_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let data = json!({
            "topic_id": topic_id,
            "author_id": author.id,
            "author_name": author.name,
            "body": body,
            "score": 0,
        });
        let document = self
            .documents
            .create_document(
                &self.collections.forum_posts,
                None,
                into_map(data),
                &Permission::shared_with_users(&author.id),
            )
            .await?;
        self.documents
            .increment_attribute(topics, topic_id, "post_count", 1)
            .await?;
        decode_document(&document)
    }

    /// Posts of a topic, oldest first.
    pub async fn list_posts(
        &self,
        topic_id: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Page<Post>, StoreError> {
        self.get_optional(&self.collections.forum_topics, topic_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let limit = clamp_page_size(limit);
        let queries = vec![
            Query::equal("topic_id", topic_id),
            Query::order_asc("$createdAt"),
            Query::limit(limit),
        ];
        let page = self
            .list_after_cursor(&self.collections.forum_posts, queries, cursor)
            .await?;
        let items = page
            .documents
            .iter()
            .map(decode_document::<Post>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::from_documents(&page.documents, limit, items))
    }

    pub async fn delete_post(
        &self,
        user_id: &str,
        post_id: &str,
    ) -> Result<BulkDeleteSummary, StoreError> {
        let posts = &self.collections.forum_posts;
        let document = self
            .get_optional(posts, post_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if author_of(&document) != Some(user_id) {
            return Err(StoreError::Forbidden);
        }

        self.documents.delete_document(posts, post_id).await?;
        if let Some(topic_id) = document.data.get("topic_id").and_then(Value::as_str) {
            match self
                .documents
                .increment_attribute(&self.collections.forum_topics, topic_id, "post_count", -1)
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => warn!(topic_id, error = %err, "post count not decremented"),
            }
        }

        let mut summary = BulkDeleteSummary {
            deleted: 1,
            ..BulkDeleteSummary::default()
        };
        self.delete_dependents(
            &self.collections.forum_votes,
            &[Query::equal("target_id", post_id)],
            &mut summary,
        )
        .await;
        Ok(summary)
    }

    /// Records the caller's vote and moves the target score by the delta
    /// with an atomic increment. `None` removes an existing vote.
    ///
    /// A vote lives at an id derived from (user, kind, target), so the
    /// backend itself refuses a second vote record for the same pair.
    pub async fn cast_vote(
        &self,
        user_id: &str,
        kind: VoteTargetKind,
        target_id: &str,
        direction: Option<VoteDirection>,
    ) -> Result<VoteResponse, StoreError> {
        let targets = self.vote_target_collection(kind);
        let target = self
            .get_optional(targets, target_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let votes = &self.collections.forum_votes;
        let vote_id = vote_document_id(user_id, kind, target_id);
        let mut previous = self.find_vote(&vote_id).await?;

        match (previous, direction) {
            (None, None) => {}
            (None, Some(next)) => {
                let data = json!({
                    "user_id": user_id,
                    "target_id": target_id,
                    "target_kind": kind.as_str(),
                    "direction": next,
                });
                let created = self
                    .documents
                    .create_document(
                        votes,
                        Some(&vote_id),
                        into_map(data),
                        &Permission::owner(user_id),
                    )
                    .await;
                match created {
                    Ok(_) => {}
                    // A concurrent request recorded the first vote; continue from it.
                    Err(err) if err.is_conflict() => {
                        previous = self.find_vote(&vote_id).await?;
                        if previous != Some(next) {
                            self.set_vote_direction(&vote_id, next).await?;
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            (Some(current), Some(next)) if current != next => {
                self.set_vote_direction(&vote_id, next).await?;
            }
            (Some(_), Some(_)) => {}
            (Some(_), None) => match self.documents.delete_document(votes, &vote_id).await {
                Ok(()) => {}
                // Removed concurrently; that request applied the delta.
                Err(err) if err.is_not_found() => previous = None,
                Err(err) => return Err(err.into()),
            },
        }

        let delta = vote_delta(previous, direction);
        let score = if delta == 0 {
            score_of(&target)
        } else {
            let updated = self
                .documents
                .increment_attribute(targets, target_id, "score", delta)
                .await?;
            score_of(&updated)
        };

        Ok(VoteResponse {
            target_id: target_id.to_string(),
            target_kind: kind,
            score,
            user_vote: direction,
        })
    }

    pub async fn user_vote(
        &self,
        user_id: &str,
        kind: VoteTargetKind,
        target_id: &str,
    ) -> Result<Option<VoteDirection>, StoreError> {
        self.find_vote(&vote_document_id(user_id, kind, target_id))
            .await
    }

    /// Recounts every vote on the target and writes the result back.
    pub async fn recompute_score(
        &self,
        kind: VoteTargetKind,
        target_id: &str,
    ) -> Result<i64, StoreError> {
        let target = self
            .get_optional(self.vote_target_collection(kind), target_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let (score, _) = self.recount(kind, &target).await?;
        Ok(score)
    }

    /// Recomputes scores of the `topic_limit` most recently updated topics
    /// and of all their posts. Individual failures are logged and counted.
    pub async fn reconcile_recent_scores(
        &self,
        topic_limit: usize,
    ) -> Result<ReconcileReport, StoreError> {
        let queries = [
            Query::order_desc("$updatedAt"),
            Query::limit(topic_limit.clamp(1, MAX_PAGE_SIZE)),
        ];
        let topics = self
            .documents
            .list_documents(&self.collections.forum_topics, &queries)
            .await?
            .documents;

        let mut report = ReconcileReport::default();
        for topic in &topics {
            report.topics += 1;
            self.reconcile_one(VoteTargetKind::Topic, topic, &mut report)
                .await;

            let posts = match self
                .list_all(
                    &self.collections.forum_posts,
                    &[Query::equal("topic_id", topic.id.as_str())],
                )
                .await
            {
                Ok(posts) => posts,
                Err(err) => {
                    warn!(topic_id = %topic.id, error = %err, "failed to list posts for reconciliation");
                    report.failed += 1;
                    continue;
                }
            };
            for post in &posts {
                report.posts += 1;
                self.reconcile_one(VoteTargetKind::Post, post, &mut report)
                    .await;
            }
        }

        Ok(report)
    }

    async fn reconcile_one(
        &self,
        kind: VoteTargetKind,
        target: &Document,
        report: &mut ReconcileReport,
    ) {
        match self.recount(kind, target).await {
            Ok((_, true)) => report.corrected += 1,
            Ok((_, false)) => {}
            Err(err) => {
                warn!(target_id = %target.id, kind = kind.as_str(), error = %err, "score recount failed");
                report.failed += 1;
            }
        }
    }

    /// Returns the recounted score and whether the stored one was wrong.
    ///
    /// The correction is an absolute write, so it is skipped when the stored
    /// score moved while the votes were being listed; the next pass retries.
    async fn recount(
        &self,
        kind: VoteTargetKind,
        target: &Document,
    ) -> Result<(i64, bool), StoreError> {
        let votes = self
            .list_all(
                &self.collections.forum_votes,
                &[
                    Query::equal("target_id", target.id.as_str()),
                    Query::equal("target_kind", kind.as_str()),
                ],
            )
            .await?;
        let score = votes
            .iter()
            .filter_map(vote_direction)
            .map(|direction| vote_delta(None, Some(direction)))
            .sum::<i64>();

        let stale = score_of(target) != score;
        if stale {
            let targets = self.vote_target_collection(kind);
            let current = self
                .get_optional(targets, &target.id)
                .await?
                .ok_or(StoreError::NotFound)?;
            if score_of(&current) != score_of(target) {
                debug!(target_id = %target.id, kind = kind.as_str(), "score moved during recount");
                return Ok((score_of(&current), false));
            }
            self.documents
                .update_document(
                    self.vote_target_collection(kind),
                    &target.id,
                    into_map(json!({ "score": score })),
                )
                .await?;
        }
        Ok((score, stale))
    }

    async fn find_vote(&self, vote_id: &str) -> Result<Option<VoteDirection>, StoreError> {
        Ok(self
            .get_optional(&self.collections.forum_votes, vote_id)
            .await?
            .as_ref()
            .and_then(vote_direction))
    }

    async fn set_vote_direction(
        &self,
        vote_id: &str,
        direction: VoteDirection,
    ) -> Result<(), StoreError> {
        self.documents
            .update_document(
                &self.collections.forum_votes,
                vote_id,
                into_map(json!({ "direction": direction })),
            )
            .await?;
        Ok(())
    }

    fn vote_target_collection(&self, kind: VoteTargetKind) -> &str {
        match kind {
            VoteTargetKind::Topic => &self.collections.forum_topics,
            VoteTargetKind::Post => &self.collections.forum_posts,
        }
    }
}

fn require_body(body: &str, max_chars: usize) -> Result<&str, StoreError> {
    let body = body.trim();
    if body.is_empty() || body.chars().count() > max_chars {
        return Err(StoreError::validation(format!(
            "body must be 1-{max_chars} characters"
        )));
    }
    Ok(body)
}

fn author_of(document: &Document) -> Option<&str> {
    document.data.get("author_id").and_then(Value::as_str)
}

fn score_of(document: &Document) -> i64 {
    document
        .data
        .get("score")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Stable vote id for one (user, kind, target) triple. UUID text fits the
/// backend's 36-character id limit.
fn vote_document_id(user_id: &str, kind: VoteTargetKind, target_id: &str) -> String {
    let key = format!("{}:{user_id}:{target_id}", kind.as_str());
    Uuid::new_v5(&VOTE_ID_NAMESPACE, key.as_bytes()).to_string()
}

fn vote_direction(vote: &Document) -> Option<VoteDirection> {
    vote.data
        .get("direction")
        .and_then(|direction| serde_json::from_value(direction.clone()).ok())
}
