use std::collections::HashMap;

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;

use crate::http::AppError;
use crate::infra::storage::{DiskStorage, StoredFile, UploadError};

pub const INVALID_FILE_TYPE: &str =
    "Invalid file type. Only JPEG, PNG and GIF image files are allowed.";

/// A parsed multipart form whose files already sit in upload storage.
///
/// Files not claimed with [`UploadForm::take_file`] are removed by
/// [`UploadForm::discard`]; handlers call it on every failure path after
/// collection.
pub struct UploadForm {
    storage: DiskStorage,
    texts: HashMap<String, String>,
    files: HashMap<String, StoredFile>,
}

impl UploadForm {
    /// Reads every part. Only names listed in `file_fields` may carry a file,
    /// at most one each.
    pub async fn collect(
        storage: &DiskStorage,
        mut multipart: Multipart,
        file_fields: &[&str],
    ) -> Result<Self, AppError> {
        let mut form = Self {
            storage: storage.clone(),
            texts: HashMap::new(),
            files: HashMap::new(),
        };

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) => return Err(form.fail(multipart_error(err)).await),
            };
            let name = field.name().unwrap_or_default().to_string();

            let Some(file_name) = field.file_name().map(str::to_string) else {
                match field.text().await {
                    Ok(text) => {
                        form.texts.insert(name, text);
                        continue;
                    }
                    Err(err) => return Err(form.fail(multipart_error(err)).await),
                }
            };

            // Browsers send an empty part for a file input left blank.
            if file_name.is_empty() {
                continue;
            }
            if !file_fields.contains(&name.as_str()) {
                return Err(form
                    .fail(AppError::bad_request(format!("Unexpected field: {}", name)))
                    .await);
            }
            if form.files.contains_key(&name) {
                return Err(form
                    .fail(AppError::bad_request(format!("Too many files for field: {}", name)))
                    .await);
            }

            let content_type = field.content_type().map(str::to_string);
            match storage.store(content_type.as_deref(), field).await {
                Ok(stored) => {
                    form.files.insert(name, stored);
                }
                Err(err) => return Err(form.fail(upload_error(err)).await),
            }
        }

        Ok(form)
    }

    pub fn take_text(&mut self, name: &str) -> Option<String> {
        self.texts.remove(name)
    }

    /// Hands ownership of a stored file to the caller; it is no longer
    /// removed by [`UploadForm::discard`].
    pub fn take_file(&mut self, name: &str) -> Option<String> {
        self.files.remove(name).map(|stored| stored.file_name)
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub async fn discard(self) {
        remove_all(&self.storage, self.files.into_values().map(|stored| stored.file_name)).await;
    }

    async fn fail(self, err: AppError) -> AppError {
        self.discard().await;
        err
    }
}

pub async fn remove_all(storage: &DiskStorage, file_names: impl IntoIterator<Item = String>) {
    for file_name in file_names {
        if let Err(err) = storage.remove(&file_name).await {
            tracing::warn!(error = %err, file_name = %file_name, "failed to remove upload");
        }
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::payload_too_large("File too large");
    }
    AppError::bad_request(err.body_text())
}

fn upload_error(err: UploadError) -> AppError {
    match err {
        UploadError::UnsupportedType => AppError::bad_request(INVALID_FILE_TYPE),
        UploadError::TooLarge { .. } => AppError::payload_too_large("File too large"),
        UploadError::Stream(message) => {
            tracing::debug!(message = %message, "upload stream aborted");
            AppError::bad_request(message)
        }
        UploadError::Io(err) => {
            tracing::error!(error = %err, "failed to write upload");
            AppError::internal()
        }
    }
}
