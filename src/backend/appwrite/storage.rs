//! Storage API: profile picture files

use async_trait::async_trait;
use serde::Deserialize;

use super::{permission, AppwriteBackend};
use crate::backend::{BackendError, BackendResult, BlobStore};

#[derive(Debug, Deserialize)]
struct FileResponse {
    #[serde(rename = "$id")]
    id: String,
}

impl AppwriteBackend {
    fn files_path(&self) -> String {
        format!("/storage/buckets/{}/files", self.settings.avatar_bucket)
    }
}

#[async_trait]
impl BlobStore for AppwriteBackend {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>, content_type: &str) -> BackendResult<String> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| BackendError::Invalid(format!("content type {}: {}", content_type, e)))?;
        let form = reqwest::multipart::Form::new()
            .text("fileId", "unique()")
            .text("permissions[]", permission::read_any())
            .part("file", part);

        let resp = self.client.post_multipart(&self.files_path(), form).await?;
        let file: FileResponse = resp.json().await?;
        tracing::debug!("Uploaded {} as {}", file_name, file.id);
        Ok(file.id)
    }

    async fn delete(&self, file_id: &str) -> BackendResult<()> {
        self.client
            .delete(&format!("{}/{}", self.files_path(), file_id))
            .await?;
        Ok(())
    }

    fn preview_url(&self, file_id: &str) -> String {
        format!(
            "{}{}/{}/preview?project={}",
            self.client.endpoint(),
            self.files_path(),
            file_id,
            self.client.project()
        )
    }

    fn file_id_from_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}{}/", self.client.endpoint(), self.files_path());
        let rest = url.strip_prefix(&prefix)?;
        let id = rest.split('/').next()?;
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }
}
