use axum::extract::Multipart;
use axum::response::Response;
use shared::backend::FileUpload;
use shared::repos::{MAX_UPLOAD_BYTES, validate_upload};
use tracing::debug;

use super::errors::{bad_request_response, store_error_response};

const FILE_FIELD: &str = "file";

/// Reads the `file` part of a multipart body. Other parts are ignored.
pub(super) async fn read_upload(mut multipart: Multipart) -> Result<FileUpload, Response> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request_response("Malformed multipart body"))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| bad_request_response("Failed to read uploaded file"))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > MAX_UPLOAD_BYTES {
                return Err(bad_request_response("file exceeds 10 MiB"));
            }
        }

        let upload = FileUpload {
            file_name,
            content_type,
            bytes,
        };
        validate_upload(&upload).map_err(store_error_response)?;
        debug!(
            file_name = %upload.file_name,
            content_type = %upload.content_type,
            size_bytes = upload.bytes.len(),
            "received file upload"
        );
        return Ok(upload);
    }

    Err(bad_request_response("Missing multipart field `file`"))
}
