use super::CollaboratorError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use event_schema::{AttachmentRef, AttachmentUpload};
use uuid::Uuid;

const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(
        &self,
        message_id: Uuid,
        upload: &AttachmentUpload,
    ) -> Result<AttachmentRef, CollaboratorError>;
}

/// Keeps decoded attachment bytes in memory, addressed by attachment id.
pub struct InMemoryFileStorage {
    blobs: DashMap<Uuid, Vec<u8>>,
    max_bytes: usize,
}

impl Default for InMemoryFileStorage {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_ATTACHMENT_BYTES)
    }
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            blobs: DashMap::new(),
            max_bytes,
        }
    }

    pub fn get(&self, attachment_id: Uuid) -> Option<Vec<u8>> {
        self.blobs.get(&attachment_id).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn store(
        &self,
        message_id: Uuid,
        upload: &AttachmentUpload,
    ) -> Result<AttachmentRef, CollaboratorError> {
        if upload.file_name.trim().is_empty() {
            return Err(CollaboratorError::Rejected("empty file name".into()));
        }
        let bytes = STANDARD
            .decode(upload.content_base64.as_bytes())
            .map_err(|e| CollaboratorError::Rejected(format!("invalid base64: {e}")))?;
        if bytes.len() > self.max_bytes {
            return Err(CollaboratorError::Rejected(format!(
                "{} exceeds {} bytes",
                upload.file_name, self.max_bytes
            )));
        }

        let id = Uuid::new_v4();
        let size_bytes = bytes.len() as u64;
        self.blobs.insert(id, bytes);
        Ok(AttachmentRef {
            id,
            file_name: upload.file_name.clone(),
            content_type: upload.content_type.clone(),
            url: format!("memory://attachments/{message_id}/{id}"),
            size_bytes,
        })
    }
}
