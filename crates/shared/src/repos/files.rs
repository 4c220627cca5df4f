use tracing::warn;

use super::{Store, StoreError};
use crate::backend::{FileUpload, Permission, StoredFile};

/// Largest accepted upload, 10 MiB.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn validate_upload(upload: &FileUpload) -> Result<(), StoreError> {
    if upload.bytes.is_empty() {
        return Err(StoreError::validation("file is empty"));
    }
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(StoreError::validation("file exceeds 10 MiB"));
    }
    let content_type = upload.content_type.trim().to_ascii_lowercase();
    if !(content_type.starts_with("image/") || content_type == "application/pdf") {
        return Err(StoreError::validation(
            "file must be an image or a PDF document",
        ));
    }
    Ok(())
}

impl Store {
    pub(super) async fn store_file(
        &self,
        bucket_id: &str,
        owner_id: &str,
        upload: FileUpload,
    ) -> Result<StoredFile, StoreError> {
        validate_upload(&upload)?;
        let stored = self
            .files
            .upload_file(bucket_id, upload, &Permission::owner(owner_id))
            .await?;
        Ok(stored)
    }

    /// Best effort: a leftover file is logged, never surfaced.
    pub(super) async fn discard_file(&self, bucket_id: &str, file_id: &str) {
        match self.files.delete_file(bucket_id, file_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(bucket_id, file_id, error = %err, "failed to delete stored file"),
        }
    }

    pub(super) fn file_url(&self, bucket_id: &str, file_id: &str) -> String {
        self.files.preview_url(bucket_id, file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_UPLOAD_BYTES, validate_upload};
    use crate::backend::FileUpload;
    use crate::repos::StoreError;

    fn upload(content_type: &str, len: usize) -> FileUpload {
        FileUpload {
            file_name: "scan".to_string(),
            content_type: content_type.to_string(),
            bytes: vec![7; len],
        }
    }

    #[test]
    fn accepts_images_and_pdfs() {
        assert!(validate_upload(&upload("image/jpeg", 1024)).is_ok());
        assert!(validate_upload(&upload("application/pdf", MAX_UPLOAD_BYTES)).is_ok());
    }

    #[test]
    fn rejects_oversized_or_unsupported_files() {
        assert!(matches!(
            validate_upload(&upload("image/png", MAX_UPLOAD_BYTES + 1)),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            validate_upload(&upload("text/html", 10)),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            validate_upload(&upload("image/png", 0)),
            Err(StoreError::Validation(_))
        ));
    }
}
