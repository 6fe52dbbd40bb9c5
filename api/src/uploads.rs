//! Multipart intake: text fields are collected, file parts are classified
//! and written to their buckets before the handler's domain logic runs —
//! the same ordering the agent endpoints rely on for their attachment
//! references.

use std::collections::HashMap;

use axum::extract::Multipart;

use agentry_core::files::{StoredUpload, UploadStore};

use crate::error::AppError;

/// Request body ceiling for the agent endpoints. Individual files are
/// capped at 5 MB by classification; the body limit just bounds the whole
/// submission (step 3 allows up to ten documents).
pub const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// One parsed multipart submission.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, Vec<String>>,
    uploads: HashMap<String, Vec<StoredUpload>>,
}

impl MultipartForm {
    /// First value of a text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values of a repeated text field.
    pub fn texts(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First upload for a file field.
    pub fn upload(&self, name: &str) -> Option<&StoredUpload> {
        self.uploads.get(name).and_then(|v| v.first())
    }

    /// All uploads for a repeated file field.
    pub fn uploads_for(&self, name: &str) -> &[StoredUpload] {
        self.uploads.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Drain a multipart stream. File parts must appear in `file_fields`;
/// each is classified against its declared purpose and persisted under
/// the upload root before the form is returned.
pub async fn read_multipart(
    mut multipart: Multipart,
    store: &UploadStore,
    file_fields: &[&str],
) -> Result<MultipartForm, AppError> {
    let mut form = MultipartForm::default();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(file_name) = field.file_name() {
            if !file_fields.contains(&name.as_str()) {
                return Err(AppError::Attachment {
                    message: format!("Unexpected file field '{name}'"),
                    field: name,
                });
            }
            let original_name = file_name.to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(malformed)?;

            let stored = store
                .classify(&name, &original_name, &content_type, bytes.len() as u64)
                .map_err(|err| AppError::Attachment {
                    field: err.field().to_string(),
                    message: err.to_string(),
                })?;

            tokio::fs::write(store.absolute_path(&stored), &bytes)
                .await
                .map_err(|e| AppError::Internal(format!("failed to persist upload: {e}")))?;

            tracing::debug!(
                field = %name,
                path = %stored.relative_path,
                size = bytes.len(),
                "stored upload"
            );
            form.uploads.entry(name).or_default().push(stored);
        } else {
            let value = field.text().await.map_err(malformed)?;
            form.fields.entry(name).or_default().push(value);
        }
    }

    Ok(form)
}

fn malformed(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation {
        message: format!("Malformed multipart body: {err}"),
        field: None,
    }
}
