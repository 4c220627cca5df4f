//! Clients for the backend-as-a-service that owns persistence, file storage
//! and account sessions.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod appwrite;
mod error;
mod memory;
mod query;

pub use appwrite::AppwriteClient;
pub use error::BackendError;
pub use memory::MemoryBackend;
pub use query::Query;

/// Largest page the document store returns for one list call.
pub const MAX_PAGE_SIZE: usize = 100;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$collectionId", default)]
    pub collection_id: String,
    #[serde(rename = "$createdAt", default)]
    pub created_at: String,
    #[serde(rename = "$updatedAt", default)]
    pub updated_at: String,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentList {
    pub total: u64,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Users,
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Read(Role),
    Update(Role),
    Delete(Role),
}

impl Permission {
    /// Read, update and delete granted to the owning user only.
    pub fn owner(user_id: &str) -> Vec<Self> {
        let role = Role::User(user_id.to_string());
        vec![
            Self::Read(role.clone()),
            Self::Update(role.clone()),
            Self::Delete(role),
        ]
    }

    /// Owner permissions plus read access for every signed-in user.
    pub fn shared_with_users(user_id: &str) -> Vec<Self> {
        let mut permissions = vec![Self::Read(Role::Users)];
        permissions.extend(Self::owner(user_id));
        permissions
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Users => write!(f, "users"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(role) => write!(f, "read(\"{role}\")"),
            Self::Update(role) => write!(f, "update(\"{role}\")"),
            Self::Delete(role) => write!(f, "delete(\"{role}\")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Account {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|candidate| candidate == label)
    }
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "bucketId", default)]
    pub bucket_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(rename = "sizeOriginal", default)]
    pub size_bytes: u64,
}

/// Collection-oriented document database scoped to one database id.
pub trait DocumentStore: Send + Sync {
    fn create_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: Option<&'a str>,
        data: Map<String, Value>,
        permissions: &'a [Permission],
    ) -> BackendFuture<'a, Document>;

    fn get_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
    ) -> BackendFuture<'a, Document>;

    fn list_documents<'a>(
        &'a self,
        collection_id: &'a str,
        queries: &'a [Query],
    ) -> BackendFuture<'a, DocumentList>;

    fn update_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
        data: Map<String, Value>,
    ) -> BackendFuture<'a, Document>;

    fn delete_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Adds `delta` to a numeric attribute in one atomic backend operation.
    fn increment_attribute<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
        attribute: &'a str,
        delta: i64,
    ) -> BackendFuture<'a, Document>;

    fn ping(&self) -> BackendFuture<'_, ()>;
}

pub trait FileStorage: Send + Sync {
    fn upload_file<'a>(
        &'a self,
        bucket_id: &'a str,
        upload: FileUpload,
        permissions: &'a [Permission],
    ) -> BackendFuture<'a, StoredFile>;

    fn delete_file<'a>(&'a self, bucket_id: &'a str, file_id: &'a str) -> BackendFuture<'a, ()>;

    fn preview_url(&self, bucket_id: &str, file_id: &str) -> String;
}

pub trait AccountVerifier: Send + Sync {
    /// Resolves a caller-supplied session JWT to the account it belongs to.
    fn verify_session<'a>(&'a self, jwt: &'a str) -> BackendFuture<'a, Account>;
}

#[cfg(test)]
mod tests {
    use super::{Permission, Role};

    #[test]
    fn owner_permissions_use_backend_role_strings() {
        let rendered = Permission::owner("u-1")
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(
            rendered,
            vec![
                "read(\"user:u-1\")".to_string(),
                "update(\"user:u-1\")".to_string(),
                "delete(\"user:u-1\")".to_string(),
            ]
        );
    }

    #[test]
    fn shared_permissions_open_read_to_users() {
        let permissions = Permission::shared_with_users("u-2");
        assert_eq!(permissions[0], Permission::Read(Role::Users));
        assert_eq!(permissions.len(), 4);
    }
}
