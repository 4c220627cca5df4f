use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::backend::{
    AppwriteClient, BackendError, Document, DocumentList, DocumentStore, FileStorage,
    MAX_PAGE_SIZE, MemoryBackend, Query,
};
use crate::config::{BackendConfig, BucketIds, CollectionIds};
use crate::models::{BulkDeleteSummary, ReadingKind};

mod appointments;
mod chat_history;
mod doctor;
mod files;
mod forum;
mod profiles;
mod readings;

pub use files::{MAX_UPLOAD_BYTES, validate_upload};
pub use forum::{ForumAuthor, ReconcileReport, vote_delta};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("record not found")]
    NotFound,
    #[error("caller may not modify this record")]
    Forbidden,
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl StoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// The cursor is only set when the page came back full.
    fn from_documents(documents: &[Document], limit: usize, items: Vec<T>) -> Self {
        let next_cursor = (documents.len() == limit)
            .then(|| documents.last().map(|doc| doc.id.clone()))
            .flatten();
        Self { items, next_cursor }
    }
}

/// Typed access to the app's collections and buckets.
#[derive(Clone)]
pub struct Store {
    documents: Arc<dyn DocumentStore>,
    files: Arc<dyn FileStorage>,
    collections: CollectionIds,
    buckets: BucketIds,
}

impl Store {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        files: Arc<dyn FileStorage>,
        collections: CollectionIds,
        buckets: BucketIds,
    ) -> Self {
        Self {
            documents,
            files,
            collections,
            buckets,
        }
    }

    pub fn connect(
        backend: &BackendConfig,
        collections: CollectionIds,
        buckets: BucketIds,
    ) -> Result<Self, BackendError> {
        let client = Arc::new(AppwriteClient::new(backend)?);
        Ok(Self::new(client.clone(), client, collections, buckets))
    }

    /// Store over an in-process backend with the local collection names.
    pub fn in_memory(backend: MemoryBackend) -> Self {
        let backend = Arc::new(backend);
        Self::new(
            backend.clone(),
            backend,
            CollectionIds::local_defaults(),
            BucketIds::local_defaults(),
        )
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.documents.ping().await?;
        Ok(())
    }

    fn reading_collection(&self, kind: ReadingKind) -> &str {
        match kind {
            ReadingKind::BloodPressure => &self.collections.blood_pressure,
            ReadingKind::BloodSugar => &self.collections.blood_sugar,
            ReadingKind::Weight => &self.collections.weight,
            ReadingKind::Bloodwork => &self.collections.bloodwork,
        }
    }

    /// Fetches a document and hides it unless `user_id` owns it.
    async fn get_owned(
        &self,
        collection_id: &str,
        document_id: &str,
        user_id: &str,
    ) -> Result<Document, StoreError> {
        let document = self.get_optional(collection_id, document_id).await?;
        match document {
            Some(document) if owner_of(&document) == Some(user_id) => Ok(document),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn get_optional(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, StoreError> {
        match self.documents.get_document(collection_id, document_id).await {
            Ok(document) => Ok(Some(document)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// One page of `queries`, continuing after a client-supplied cursor.
    /// The backend rejects a cursor outside the result set (stale, foreign
    /// or made up), which is reported as invalid input.
    async fn list_after_cursor(
        &self,
        collection_id: &str,
        mut queries: Vec<Query>,
        cursor: Option<&str>,
    ) -> Result<DocumentList, StoreError> {
        if let Some(cursor) = cursor {
            queries.push(Query::cursor_after(cursor));
        }
        match self.documents.list_documents(collection_id, &queries).await {
            Ok(page) => Ok(page),
            Err(err) if cursor.is_some() && err.is_bad_request() => {
                Err(StoreError::validation("cursor does not belong to this listing"))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every document matching `filters`, paged by id.
    async fn list_all(
        &self,
        collection_id: &str,
        filters: &[Query],
    ) -> Result<Vec<Document>, StoreError> {
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let queries = paged_by_id(filters, cursor.as_deref());
            let page = self.documents.list_documents(collection_id, &queries).await?;
            let fetched = page.documents.len();
            cursor = page.documents.last().map(|doc| doc.id.clone());
            collected.extend(page.documents);
            if fetched < MAX_PAGE_SIZE {
                break;
            }
        }

        Ok(collected)
    }

    /// Deletes every document matching `filters` in batches of
    /// [`MAX_PAGE_SIZE`], concurrently within a batch.
    ///
    /// Failed deletions are counted and skipped: the listing is ordered by
    /// id and the cursor moves past the greatest failed id, so each document
    /// is attempted exactly once. Only a failure of the first listing is an
    /// error; a later one stops the run and marks the summary incomplete.
    async fn delete_matching(
        &self,
        collection_id: &str,
        filters: &[Query],
    ) -> Result<BulkDeleteSummary, StoreError> {
        let mut summary = BulkDeleteSummary::default();
        let mut cursor: Option<String> = None;
        let mut first_page = true;

        loop {
            let queries = paged_by_id(filters, cursor.as_deref());
            let page = match self.documents.list_documents(collection_id, &queries).await {
                Ok(page) => page,
                Err(err) if first_page => return Err(err.into()),
                Err(err) => {
                    warn!(
                        collection_id,
                        deleted = summary.deleted,
                        failed = summary.failed,
                        error = %err,
                        "bulk delete stopped early"
                    );
                    summary.incomplete = true;
                    break;
                }
            };
            first_page = false;
            if page.documents.is_empty() {
                break;
            }

            let outcomes = join_all(
                page.documents
                    .iter()
                    .map(|doc| self.documents.delete_document(collection_id, &doc.id)),
            )
            .await;

            for (document, outcome) in page.documents.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => summary.deleted += 1,
                    // Already gone.
                    Err(err) if err.is_not_found() => summary.deleted += 1,
                    Err(err) => {
                        warn!(
                            collection_id,
                            document_id = %document.id,
                            error = %err,
                            "bulk delete skipped document"
                        );
                        summary.failed += 1;
                        if cursor.as_deref().is_none_or(|current| document.id.as_str() > current) {
                            cursor = Some(document.id.clone());
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    /// [`Self::delete_matching`] for dependents of an already deleted
    /// parent. The parent is gone either way, so any failure is folded into
    /// `summary` as an incomplete run.
    async fn delete_dependents(
        &self,
        collection_id: &str,
        filters: &[Query],
        summary: &mut BulkDeleteSummary,
    ) {
        match self.delete_matching(collection_id, filters).await {
            Ok(dependents) => summary.merge(dependents),
            Err(err) => {
                warn!(collection_id, error = %err, "dependent cleanup failed");
                summary.incomplete = true;
            }
        }
    }
}

fn paged_by_id(filters: &[Query], cursor: Option<&str>) -> Vec<Query> {
    let mut queries = filters.to_vec();
    queries.push(Query::order_asc("$id"));
    queries.push(Query::limit(MAX_PAGE_SIZE));
    if let Some(cursor) = cursor {
        queries.push(Query::cursor_after(cursor));
    }
    queries
}

fn owner_of(document: &Document) -> Option<&str> {
    document.data.get("user_id").and_then(Value::as_str)
}

/// Decodes a document, exposing `$id` as `id` and `$createdAt` as
/// `created_at` unless the record already stores them.
fn decode_document<T: DeserializeOwned>(document: &Document) -> Result<T, StoreError> {
    let mut data = document.data.clone();
    data.entry("id")
        .or_insert_with(|| Value::String(document.id.clone()));
    data.entry("created_at")
        .or_insert_with(|| Value::String(document.created_at.clone()));
    serde_json::from_value(Value::Object(data)).map_err(|err| {
        StoreError::InvalidData(format!(
            "document {} in {}: {err}",
            document.id, document.collection_id
        ))
    })
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Stored timestamps share one fixed-width format so they order as strings.
fn stored_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn clamp_page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}
