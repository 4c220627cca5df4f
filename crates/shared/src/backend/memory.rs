use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::query::{attribute_value, compare_values, strip_system_attributes};
use super::{
    Account, AccountVerifier, BackendError, BackendFuture, Document, DocumentList, DocumentStore,
    FileStorage, FileUpload, Permission, Query, StoredFile,
};

const DEFAULT_LIST_LIMIT: usize = 25;

/// In-process backend with the same query semantics as the remote store.
///
/// Collections keep insertion order, which is also the default list order.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<Document>>,
    files: HashMap<String, Vec<StoredFile>>,
    accounts: HashMap<String, Account>,
    failing_deletes: HashSet<String>,
    lists_before_failure: Option<usize>,
    unavailable: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `jwt` resolve to `account` in [`AccountVerifier::verify_session`].
    pub fn register_account(&self, jwt: &str, account: Account) {
        self.state().accounts.insert(jwt.to_string(), account);
    }

    /// Deletes of the given document id fail until cleared.
    pub fn fail_deletes_for(&self, document_id: &str) {
        self.state().failing_deletes.insert(document_id.to_string());
    }

    pub fn clear_delete_failures(&self) {
        self.state().failing_deletes.clear();
    }

    /// Lets the next `successful_calls` listings through, then fails every
    /// listing until cleared.
    pub fn fail_lists_after(&self, successful_calls: usize) {
        self.state().lists_before_failure = Some(successful_calls);
    }

    pub fn clear_list_failures(&self) {
        self.state().lists_before_failure = None;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn document_count(&self, collection_id: &str) -> usize {
        self.state()
            .collections
            .get(collection_id)
            .map_or(0, Vec::len)
    }

    pub fn file_count(&self, bucket_id: &str) -> usize {
        self.state().files.get(bucket_id).map_or(0, Vec::len)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut MemoryState) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(BackendError::Unavailable {
                operation,
                message: "memory backend marked unavailable".to_string(),
            });
        }
        f(&mut state)
    }
}

impl MemoryState {
    fn find_mut(
        &mut self,
        operation: &'static str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<&mut Document, BackendError> {
        self.collections
            .get_mut(collection_id)
            .and_then(|documents| documents.iter_mut().find(|doc| doc.id == document_id))
            .ok_or(BackendError::NotFound { operation })
    }
}

impl DocumentStore for MemoryBackend {
    fn create_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: Option<&'a str>,
        data: Map<String, Value>,
        permissions: &'a [Permission],
    ) -> BackendFuture<'a, Document> {
        let result = self.run("create_document", |state| {
            let documents = state
                .collections
                .entry(collection_id.to_string())
                .or_default();
            let id = document_id
                .map(ToString::to_string)
                .unwrap_or_else(new_id);
            if documents.iter().any(|doc| doc.id == id) {
                return Err(BackendError::Rejected {
                    operation: "create_document",
                    status: 409,
                    code: "document_already_exists".to_string(),
                    message: format!("document {id} already exists"),
                });
            }

            let now = timestamp_now();
            let document = Document {
                id,
                collection_id: collection_id.to_string(),
                created_at: now.clone(),
                updated_at: now,
                permissions: permissions.iter().map(ToString::to_string).collect(),
                data: strip_system_attributes(data),
            };
            documents.push(document.clone());
            Ok(document)
        });
        Box::pin(async move { result })
    }

    fn get_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
    ) -> BackendFuture<'a, Document> {
        let result = self.run("get_document", |state| {
            state
                .find_mut("get_document", collection_id, document_id)
                .map(|doc| doc.clone())
        });
        Box::pin(async move { result })
    }

    fn list_documents<'a>(
        &'a self,
        collection_id: &'a str,
        queries: &'a [Query],
    ) -> BackendFuture<'a, DocumentList> {
        let result = self.run("list_documents", |state| {
            if let Some(remaining) = state.lists_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(BackendError::Unavailable {
                        operation: "list_documents",
                        message: "injected list failure".to_string(),
                    });
                }
                *remaining -= 1;
            }
            let documents = state
                .collections
                .get(collection_id)
                .cloned()
                .unwrap_or_default();
            evaluate_queries(documents, queries)
        });
        Box::pin(async move { result })
    }

    fn update_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
        data: Map<String, Value>,
    ) -> BackendFuture<'a, Document> {
        let result = self.run("update_document", |state| {
            let document = state.find_mut("update_document", collection_id, document_id)?;
            for (key, value) in strip_system_attributes(data) {
                document.data.insert(key, value);
            }
            document.updated_at = timestamp_now();
            Ok(document.clone())
        });
        Box::pin(async move { result })
    }

    fn delete_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        let result = self.run("delete_document", |state| {
            if state.failing_deletes.contains(document_id) {
                return Err(BackendError::Unavailable {
                    operation: "delete_document",
                    message: format!("injected delete failure for {document_id}"),
                });
            }
            let documents = state
                .collections
                .get_mut(collection_id)
                .ok_or(BackendError::NotFound {
                    operation: "delete_document",
                })?;
            let before = documents.len();
            documents.retain(|doc| doc.id != document_id);
            if documents.len() == before {
                return Err(BackendError::NotFound {
                    operation: "delete_document",
                });
            }
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn increment_attribute<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
        attribute: &'a str,
        delta: i64,
    ) -> BackendFuture<'a, Document> {
        let result = self.run("increment_attribute", |state| {
            let document = state.find_mut("increment_attribute", collection_id, document_id)?;
            let current = match document.data.get(attribute) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(number)) => number.as_i64().ok_or_else(|| {
                    BackendError::invalid_payload("increment_attribute", "attribute is not an integer")
                })?,
                Some(_) => {
                    return Err(BackendError::Rejected {
                        operation: "increment_attribute",
                        status: 400,
                        code: "attribute_type_invalid".to_string(),
                        message: format!("attribute {attribute} is not numeric"),
                    });
                }
            };
            document
                .data
                .insert(attribute.to_string(), Value::from(current.saturating_add(delta)));
            document.updated_at = timestamp_now();
            Ok(document.clone())
        });
        Box::pin(async move { result })
    }

    fn ping(&self) -> BackendFuture<'_, ()> {
        let result = self.run("ping", |_| Ok(()));
        Box::pin(async move { result })
    }
}

impl FileStorage for MemoryBackend {
    fn upload_file<'a>(
        &'a self,
        bucket_id: &'a str,
        upload: FileUpload,
        _permissions: &'a [Permission],
    ) -> BackendFuture<'a, StoredFile> {
        let result = self.run("upload_file", |state| {
            let file = StoredFile {
                id: new_id(),
                bucket_id: bucket_id.to_string(),
                name: upload.file_name,
                mime_type: upload.content_type,
                size_bytes: upload.bytes.len() as u64,
            };
            state
                .files
                .entry(bucket_id.to_string())
                .or_default()
                .push(file.clone());
            Ok(file)
        });
        Box::pin(async move { result })
    }

    fn delete_file<'a>(&'a self, bucket_id: &'a str, file_id: &'a str) -> BackendFuture<'a, ()> {
        let result = self.run("delete_file", |state| {
            let files = state.files.get_mut(bucket_id).ok_or(BackendError::NotFound {
                operation: "delete_file",
            })?;
            let before = files.len();
            files.retain(|file| file.id != file_id);
            if files.len() == before {
                return Err(BackendError::NotFound {
                    operation: "delete_file",
                });
            }
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn preview_url(&self, bucket_id: &str, file_id: &str) -> String {
        format!("memory://storage/buckets/{bucket_id}/files/{file_id}/preview")
    }
}

impl AccountVerifier for MemoryBackend {
    fn verify_session<'a>(&'a self, jwt: &'a str) -> BackendFuture<'a, Account> {
        let result = self.run("verify_session", |state| {
            state
                .accounts
                .get(jwt)
                .cloned()
                .ok_or(BackendError::Unauthorized {
                    operation: "verify_session",
                })
        });
        Box::pin(async move { result })
    }
}

fn evaluate_queries(
    documents: Vec<Document>,
    queries: &[Query],
) -> Result<DocumentList, BackendError> {
    let mut matched = documents
        .into_iter()
        .filter(|doc| queries.iter().all(|query| query.matches(doc)))
        .collect::<Vec<_>>();
    let total = matched.len() as u64;

    let orders = queries
        .iter()
        .filter_map(|query| match query {
            Query::OrderAsc(attribute) => Some((attribute.as_str(), false)),
            Query::OrderDesc(attribute) => Some((attribute.as_str(), true)),
            _ => None,
        })
        .collect::<Vec<_>>();
    if !orders.is_empty() {
        matched.sort_by(|left, right| {
            for (attribute, descending) in &orders {
                let ordering = compare_values(
                    &attribute_value(left, attribute),
                    &attribute_value(right, attribute),
                )
                .unwrap_or(Ordering::Equal);
                let ordering = if *descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let mut start = 0;
    let mut limit = DEFAULT_LIST_LIMIT;
    for query in queries {
        match query {
            Query::CursorAfter(cursor) => {
                let position = matched
                    .iter()
                    .position(|doc| &doc.id == cursor)
                    .ok_or_else(|| BackendError::Rejected {
                        operation: "list_documents",
                        status: 400,
                        code: "document_not_found".to_string(),
                        message: format!("cursor document {cursor} not found"),
                    })?;
                start += position + 1;
            }
            Query::Offset(offset) => start += offset,
            Query::Limit(value) => limit = *value,
            _ => {}
        }
    }

    let documents = matched.into_iter().skip(start).take(limit).collect();
    Ok(DocumentList { total, documents })
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
