//! Storage for synthesized reply audio.
//!
//! The telephony platform fetches reply audio by URL, so every stored clip
//! gets a public address of the form `{public_base_url}/audio/{key}`. Keys are
//! content hashes, which lets identical replies share one object.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    Error as ObjectStoreError, ObjectStore, PutPayload, aws::AmazonS3Builder,
    local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::tts::SynthesizedAudio;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid audio key: {0}")]
    InvalidKey(String),
    #[error("Audio not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Storage configuration error: {0}")]
    Configuration(String),
}

impl From<ObjectStoreError> for StorageError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Audio fetched back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAudio {
    pub data: Bytes,
    pub content_type: &'static str,
}

#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Persist `audio` under `key` and return its public URL.
    async fn put(&self, key: &str, audio: &SynthesizedAudio) -> Result<String, StorageError>;

    async fn get(&self, key: &str) -> Result<StoredAudio, StorageError>;

    /// Public URL for `key`, whether or not it exists yet.
    fn url_for(&self, key: &str) -> String;
}

/// Keys are flat file names: `{hash}.{ext}`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

pub fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// [`AudioStore`] over any `object_store` backend.
pub struct ObjectAudioStore {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    public_base_url: String,
}

impl ObjectAudioStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: Option<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let prefix = prefix
            .map(|p| p.trim().trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            store,
            prefix,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn in_memory(public_base_url: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), None, public_base_url)
    }

    pub fn local(
        root: &Path,
        prefix: Option<String>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root).map_err(|e| {
            StorageError::Configuration(format!(
                "Failed to create audio directory {}: {e}",
                root.display()
            ))
        })?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        info!("Storing reply audio under {}", root.display());
        Ok(Self::new(Arc::new(fs), prefix, public_base_url))
    }

    /// S3 bucket; credentials and region come from the standard AWS environment.
    pub fn s3(
        bucket: &str,
        prefix: Option<String>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let s3 = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        info!("Storing reply audio in s3://{}", bucket);
        Ok(Self::new(Arc::new(s3), prefix, public_base_url))
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath, StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let raw = match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        };
        ObjectPath::parse(raw).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }
}

#[async_trait]
impl AudioStore for ObjectAudioStore {
    async fn put(&self, key: &str, audio: &SynthesizedAudio) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        self.store
            .put(&path, PutPayload::from(audio.data.clone()))
            .await?;
        debug!(key, bytes = audio.len(), "Stored reply audio");
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<StoredAudio, StorageError> {
        let path = self.object_path(key)?;
        let data = self.store.get(&path).await?.bytes().await?;
        Ok(StoredAudio {
            data,
            content_type: content_type_for(key),
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/audio/{}", self.public_base_url, key)
    }
}
