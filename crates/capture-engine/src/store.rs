//! Artifact blob storage.
//!
//! The store only uploads bytes and hands back a public url; the artifact
//! *record* (run/provider/engine/mode row) is appended by the run store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use inboxshot_core_types::PipelineError;

/// Result of one upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredArtifact {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload `bytes` under `key` with public read access.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StoredArtifact, PipelineError>;
}

#[async_trait]
impl<S> ArtifactStore for Arc<S>
where
    S: ArtifactStore + ?Sized,
{
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StoredArtifact, PipelineError> {
        (**self).put(key, bytes).await
    }
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).map(|entry| entry.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StoredArtifact, PipelineError> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(StoredArtifact {
            key: key.to_string(),
            url: format!("memory://{key}"),
        })
    }
}

#[derive(Clone, Debug)]
pub struct BlobStoreConfig {
    pub base_url: String,
    pub token: String,
}

/// Remote blob store: token-authenticated PUT, public-read objects.
pub struct HttpBlobStore {
    cfg: BlobStoreConfig,
    http: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(cfg: BlobStoreConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl ArtifactStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StoredArtifact, PipelineError> {
        let url = self.object_url(key);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.cfg.token)
            .header("x-access", "public")
            .header("content-type", "image/png")
            .body(bytes)
            .send()
            .await
            .map_err(|err| PipelineError::storage(format!("blob put failed: {err}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::storage(format!(
                "blob put for {key} returned {}",
                response.status()
            )));
        }

        debug!(target: "capture-engine", %key, %url, "artifact uploaded");
        Ok(StoredArtifact {
            key: key.to_string(),
            url,
        })
    }
}
