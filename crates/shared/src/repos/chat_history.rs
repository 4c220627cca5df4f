use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use super::{Store, StoreError, decode_document, into_map, stored_timestamp};
use crate::backend::{Document, MAX_PAGE_SIZE, Permission, Query};
use crate::chat::{parse_timestamp, summarize_sessions};
use crate::models::{BulkDeleteSummary, ChatMessage, ChatRole, SessionSummary};

impl Store {
    pub async fn append_chat_message(
        &self,
        user_id: &str,
        session_id: &str,
        role: ChatRole,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage, StoreError> {
        let data = json!({
            "user_id": user_id,
            "session_id": session_id,
            "role": role.as_str(),
            "content": content,
            "timestamp": stored_timestamp(at),
        });
        let document = self
            .documents
            .create_document(
                &self.collections.chat_messages,
                None,
                into_map(data),
                &Permission::owner(user_id),
            )
            .await?;
        decode_document(&document)
    }

    /// Up to `limit` of the user's messages, newest first.
    pub async fn list_recent_chat_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        while messages.len() < limit {
            let batch = (limit - messages.len()).min(MAX_PAGE_SIZE);
            let mut queries = vec![
                Query::equal("user_id", user_id),
                Query::order_desc("timestamp"),
                Query::limit(batch),
            ];
            if let Some(cursor) = &cursor {
                queries.push(Query::cursor_after(cursor.clone()));
            }

            let page = self
                .documents
                .list_documents(&self.collections.chat_messages, &queries)
                .await?;
            let fetched = page.documents.len();
            cursor = page.documents.last().map(|doc| doc.id.clone());
            messages.extend(decode_messages(&page.documents));
            if fetched < batch {
                break;
            }
        }

        Ok(messages)
    }

    pub async fn list_chat_sessions(
        &self,
        user_id: &str,
        message_limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let messages = self.list_recent_chat_messages(user_id, message_limit).await?;
        Ok(summarize_sessions(&messages, now))
    }

    /// Every message of one session, oldest first.
    pub async fn list_session_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let documents = self
            .list_all(
                &self.collections.chat_messages,
                &session_filter(user_id, session_id),
            )
            .await?;
        let mut messages = decode_messages(&documents);
        messages.sort_by(|a, b| {
            match (parse_timestamp(&a.timestamp), parse_timestamp(&b.timestamp)) {
                (Some(left), Some(right)) => left.cmp(&right),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
        Ok(messages)
    }

    pub async fn delete_chat_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<BulkDeleteSummary, StoreError> {
        self.delete_matching(
            &self.collections.chat_messages,
            &session_filter(user_id, session_id),
        )
        .await
    }

    pub async fn delete_all_chat_history(
        &self,
        user_id: &str,
    ) -> Result<BulkDeleteSummary, StoreError> {
        self.delete_matching(
            &self.collections.chat_messages,
            &[Query::equal("user_id", user_id)],
        )
        .await
    }
}

fn session_filter(user_id: &str, session_id: &str) -> [Query; 2] {
    [
        Query::equal("user_id", user_id),
        Query::equal("session_id", session_id),
    ]
}

/// Undecodable messages are logged and left out rather than failing the read.
fn decode_messages(documents: &[Document]) -> Vec<ChatMessage> {
    documents
        .iter()
        .filter_map(|document| match decode_document::<ChatMessage>(document) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "skipping unreadable chat message");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use crate::backend::{DocumentStore, MemoryBackend};
    use crate::models::ChatRole;
    use crate::repos::{Store, into_map};

    #[tokio::test]
    async fn sessions_are_rebuilt_from_stored_messages() {
        let store = Store::in_memory(MemoryBackend::new());
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let turns = [
            ("s1", ChatRole::User, "Can I drink coffee?", 0),
            ("s1", ChatRole::Assistant, "Up to 200 mg a day.", 1),
            ("s2", ChatRole::User, "Best sleeping position?", 10),
            ("s1", ChatRole::User, "And green tea?", 20),
            ("s2", ChatRole::Assistant, "Left side.", 11),
        ];
        for (session, role, content, minute) in turns {
            store
                .append_chat_message("u1", session, role, content, start + Duration::minutes(minute))
                .await
                .expect("append message");
        }
        store
            .append_chat_message("u2", "s9", ChatRole::User, "not mine", start)
            .await
            .expect("append foreign message");

        let summaries = store
            .list_chat_sessions("u1", 100, start + Duration::minutes(30))
            .await
            .expect("list sessions");

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].session_id, "s1");
        assert_eq!(summaries[0].message_count, 3);
        assert_eq!(summaries[0].preview, "Can I drink coffee?");
        assert_eq!(summaries[0].last_active, "10 minutes ago");
        assert_eq!(summaries[1].message_count, 2);
    }

    #[tokio::test]
    async fn recent_messages_respect_limit_across_pages() {
        let store = Store::in_memory(MemoryBackend::new());
        let start = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        for minute in 0..150 {
            store
                .append_chat_message("u1", "s1", ChatRole::User, "hi", start + Duration::minutes(minute))
                .await
                .expect("append message");
        }

        let recent = store
            .list_recent_chat_messages("u1", 120)
            .await
            .expect("list recent");
        assert_eq!(recent.len(), 120);
        assert!(recent[0].timestamp > recent[119].timestamp);
    }

    #[tokio::test]
    async fn deleting_a_session_leaves_other_sessions() {
        let backend = MemoryBackend::new();
        let store = Store::in_memory(backend.clone());
        let now = Utc::now();
        for index in 0..5 {
            store
                .append_chat_message("u1", "doomed", ChatRole::User, "x", now + Duration::seconds(index))
                .await
                .expect("append message");
        }
        store
            .append_chat_message("u1", "kept", ChatRole::User, "y", now)
            .await
            .expect("append message");

        let summary = store
            .delete_chat_session("u1", "doomed")
            .await
            .expect("delete session");

        assert_eq!(summary.deleted, 5);
        assert_eq!(summary.failed, 0);
        assert!(
            store
                .list_session_messages("u1", "doomed")
                .await
                .expect("list messages")
                .is_empty()
        );
        assert_eq!(backend.document_count("chat_messages"), 1);
    }

    #[tokio::test]
    async fn unreadable_messages_are_skipped() {
        let backend = MemoryBackend::new();
        let store = Store::in_memory(backend.clone());
        backend
            .create_document(
                "chat_messages",
                None,
                into_map(json!({ "user_id": "u1", "session_id": "s1", "role": "robot" })),
                &[],
            )
            .await
            .expect("seed broken message");
        store
            .append_chat_message("u1", "s1", ChatRole::User, "hello", Utc::now())
            .await
            .expect("append message");

        let messages = store.list_session_messages("u1", "s1").await.expect("list");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
    }
}
