use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;
use url::Url;

use super::query::strip_system_attributes;
use super::{
    Account, AccountVerifier, BackendError, BackendFuture, Document, DocumentList, DocumentStore,
    FileStorage, FileUpload, Permission, Query, StoredFile,
};
use crate::config::BackendConfig;

const PROJECT_HEADER: &str = "X-Appwrite-Project";
const API_KEY_HEADER: &str = "X-Appwrite-Key";
const JWT_HEADER: &str = "X-Appwrite-JWT";
const UNIQUE_ID: &str = "unique()";

/// REST client for an Appwrite-compatible backend.
#[derive(Clone)]
pub struct AppwriteClient {
    client: reqwest::Client,
    endpoint: Url,
    project_id: String,
    api_key: String,
    database_id: String,
}

#[derive(Debug, Deserialize)]
struct BackendErrorEnvelope {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<Value>,
}

impl AppwriteClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| BackendError::Unavailable {
                operation: "build_client",
                message: err.to_string(),
            })?;
        let endpoint = Url::parse(config.endpoint.trim_end_matches('/'))
            .map_err(|err| BackendError::invalid_payload("build_client", err))?;

        Ok(Self {
            client,
            endpoint,
            project_id: config.project_id.clone(),
            api_key: config.api_key.clone(),
            database_id: config.database_id.clone(),
        })
    }

    fn url_for(&self, operation: &'static str, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::invalid_payload(operation, "endpoint cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn documents_url(
        &self,
        operation: &'static str,
        collection_id: &str,
        rest: &[&str],
    ) -> Result<Url, BackendError> {
        let mut segments = vec![
            "databases",
            self.database_id.as_str(),
            "collections",
            collection_id,
            "documents",
        ];
        segments.extend_from_slice(rest);
        self.url_for(operation, &segments)
    }

    fn server_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(PROJECT_HEADER, &self.project_id)
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = send(operation, request).await?;
        let response = check_status(operation, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| BackendError::invalid_payload(operation, err))
    }

    async fn send_empty(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<(), BackendError> {
        let response = send(operation, request).await?;
        check_status(operation, response).await?;
        Ok(())
    }
}

impl DocumentStore for AppwriteClient {
    fn create_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: Option<&'a str>,
        data: Map<String, Value>,
        permissions: &'a [Permission],
    ) -> BackendFuture<'a, Document> {
        Box::pin(async move {
            let operation = "create_document";
            let url = self.documents_url(operation, collection_id, &[])?;
            let body = json!({
                "documentId": document_id.unwrap_or(UNIQUE_ID),
                "data": strip_system_attributes(data),
                "permissions": render_permissions(permissions),
            });
            debug!(collection_id, "creating document");
            self.send_json(operation, self.server_request(Method::POST, url).json(&body))
                .await
        })
    }

    fn get_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
    ) -> BackendFuture<'a, Document> {
        Box::pin(async move {
            let operation = "get_document";
            let url = self.documents_url(operation, collection_id, &[document_id])?;
            self.send_json(operation, self.server_request(Method::GET, url))
                .await
        })
    }

    fn list_documents<'a>(
        &'a self,
        collection_id: &'a str,
        queries: &'a [Query],
    ) -> BackendFuture<'a, DocumentList> {
        Box::pin(async move {
            let operation = "list_documents";
            let mut url = self.documents_url(operation, collection_id, &[])?;
            {
                let mut pairs = url.query_pairs_mut();
                for query in queries {
                    pairs.append_pair("queries[]", &query.to_wire());
                }
            }
            self.send_json(operation, self.server_request(Method::GET, url))
                .await
        })
    }

    fn update_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
        data: Map<String, Value>,
    ) -> BackendFuture<'a, Document> {
        Box::pin(async move {
            let operation = "update_document";
            let url = self.documents_url(operation, collection_id, &[document_id])?;
            let body = json!({ "data": strip_system_attributes(data) });
            self.send_json(operation, self.server_request(Method::PATCH, url).json(&body))
                .await
        })
    }

    fn delete_document<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let operation = "delete_document";
            let url = self.documents_url(operation, collection_id, &[document_id])?;
            self.send_empty(operation, self.server_request(Method::DELETE, url))
                .await
        })
    }

    fn increment_attribute<'a>(
        &'a self,
        collection_id: &'a str,
        document_id: &'a str,
        attribute: &'a str,
        delta: i64,
    ) -> BackendFuture<'a, Document> {
        Box::pin(async move {
            if delta == 0 {
                return self.get_document(collection_id, document_id).await;
            }

            let operation = "increment_attribute";
            let direction = if delta > 0 { "increment" } else { "decrement" };
            let url =
                self.documents_url(operation, collection_id, &[document_id, attribute, direction])?;
            let body = json!({ "value": delta.unsigned_abs() });
            self.send_json(operation, self.server_request(Method::PATCH, url).json(&body))
                .await
        })
    }

    fn ping(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let operation = "ping";
            let url = self.url_for(operation, &["health"])?;
            self.send_empty(operation, self.server_request(Method::GET, url))
                .await
        })
    }
}

impl FileStorage for AppwriteClient {
    fn upload_file<'a>(
        &'a self,
        bucket_id: &'a str,
        upload: FileUpload,
        permissions: &'a [Permission],
    ) -> BackendFuture<'a, StoredFile> {
        Box::pin(async move {
            let operation = "upload_file";
            let url = self.url_for(operation, &["storage", "buckets", bucket_id, "files"])?;
            let part = Part::bytes(upload.bytes)
                .file_name(upload.file_name)
                .mime_str(&upload.content_type)
                .map_err(|err| BackendError::invalid_payload(operation, err))?;

            let mut form = Form::new().text("fileId", UNIQUE_ID).part("file", part);
            for permission in render_permissions(permissions) {
                form = form.text("permissions[]", permission);
            }

            self.send_json(
                operation,
                self.server_request(Method::POST, url).multipart(form),
            )
            .await
        })
    }

    fn delete_file<'a>(&'a self, bucket_id: &'a str, file_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let operation = "delete_file";
            let url = self.url_for(operation, &["storage", "buckets", bucket_id, "files", file_id])?;
            self.send_empty(operation, self.server_request(Method::DELETE, url))
                .await
        })
    }

    fn preview_url(&self, bucket_id: &str, file_id: &str) -> String {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "buckets", bucket_id, "files", file_id, "preview"]);
        }
        url.query_pairs_mut()
            .append_pair("project", &self.project_id);
        url.to_string()
    }
}

impl AccountVerifier for AppwriteClient {
    fn verify_session<'a>(&'a self, jwt: &'a str) -> BackendFuture<'a, Account> {
        Box::pin(async move {
            let operation = "verify_session";
            let url = self.url_for(operation, &["account"])?;
            // Session calls run as the end user, never with the server key.
            let request = self
                .client
                .get(url)
                .header(PROJECT_HEADER, &self.project_id)
                .header(JWT_HEADER, jwt);
            self.send_json(operation, request).await
        })
    }
}

fn render_permissions(permissions: &[Permission]) -> Vec<String> {
    permissions.iter().map(ToString::to_string).collect()
}

async fn send(operation: &'static str, request: RequestBuilder) -> Result<Response, BackendError> {
    request.send().await.map_err(|err| BackendError::Unavailable {
        operation,
        message: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
    })
}

async fn check_status(operation: &'static str, response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(operation, status, &body))
}

fn error_for_status(operation: &'static str, status: StatusCode, body: &str) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => return BackendError::NotFound { operation },
        StatusCode::UNAUTHORIZED => return BackendError::Unauthorized { operation },
        _ => {}
    }

    let envelope = serde_json::from_str::<BackendErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|envelope| envelope.message.clone())
        .unwrap_or_else(|| "no error message".to_string());
    let code = envelope
        .and_then(|envelope| {
            envelope.error_type.or_else(|| match envelope.code {
                Some(Value::String(code)) => Some(code),
                Some(Value::Number(code)) => Some(code.to_string()),
                _ => None,
            })
        })
        .unwrap_or_else(|| "unknown".to_string());

    if status.is_server_error() {
        return BackendError::Unavailable {
            operation,
            message: format!("status={} code={code}", status.as_u16()),
        };
    }

    BackendError::Rejected {
        operation,
        status: status.as_u16(),
        code,
        message,
    }
}
