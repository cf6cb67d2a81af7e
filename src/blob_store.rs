//! Content-addressed archive for raw document bytes.
//!
//! Two backends behind one trait: a filesystem backend (atomic
//! write-then-rename) and an S3-compatible object-store backend for a
//! MinIO-class endpoint. Path layout is `{root}/{doc_id}/{ts}.{ext}`
//! locally, `s3://{bucket}/court-registry-raw/{doc_id}/{ts}.{ext}` remotely.

use crate::config::Config;
use crate::error::BlobStoreError;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, doc_id: Uuid, bytes: &[u8], ext: &str) -> Result<String, BlobStoreError>;
    async fn load(&self, path: &str) -> Result<Vec<u8>, BlobStoreError>;
    async fn exists(&self, path: &str) -> Result<bool, BlobStoreError>;
}

fn timestamped_filename(ext: &str) -> String {
    format!("{}.{}", Utc::now().format("%Y%m%dT%H%M%S%.f"), ext)
}

/// Filesystem-rooted backend used when `storage_type = "local"`.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn save(&self, doc_id: Uuid, bytes: &[u8], ext: &str) -> Result<String, BlobStoreError> {
        let dir = self.root.join(doc_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let filename = timestamped_filename(ext);
        let final_path = dir.join(&filename);
        let tmp_path = dir.join(format!(".{filename}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path.to_string_lossy().into_owned())
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>, BlobStoreError> {
        tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobStoreError::NotFound(path.to_string())
            } else {
                BlobStoreError::Io(e)
            }
        })
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobStoreError> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

/// S3-API backend for a MinIO-class single-bucket endpoint.
///
/// Deliberately minimal: provisioning (bucket creation) is out of scope,
/// this only issues PUT/GET/HEAD against an already-provisioned bucket.
pub struct ObjectStoreBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: &'static str,
}

impl ObjectStoreBlobStore {
    pub fn new(client: reqwest::Client, endpoint: String, bucket: String) -> Self {
        Self { client, endpoint, bucket, prefix: "court-registry-raw" }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn save(&self, doc_id: Uuid, bytes: &[u8], ext: &str) -> Result<String, BlobStoreError> {
        let filename = timestamped_filename(ext);
        let key = format!("{}/{}/{}", self.prefix, doc_id, filename);
        let resp = self
            .client
            .put(self.object_url(&key))
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| BlobStoreError::ObjectStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BlobStoreError::ObjectStore(format!(
                "PUT {key} returned {}",
                resp.status()
            )));
        }
        Ok(format!("s3://{}/{key}", self.bucket))
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>, BlobStoreError> {
        let key = path
            .strip_prefix(&format!("s3://{}/", self.bucket))
            .ok_or_else(|| BlobStoreError::NotFound(path.to_string()))?;
        let resp = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| BlobStoreError::ObjectStore(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobStoreError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(BlobStoreError::ObjectStore(format!(
                "GET {key} returned {}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await.map_err(|e| BlobStoreError::ObjectStore(e.to_string()))?.to_vec())
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobStoreError> {
        let key = match path.strip_prefix(&format!("s3://{}/", self.bucket)) {
            Some(k) => k,
            None => return Ok(false),
        };
        let resp = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| BlobStoreError::ObjectStore(e.to_string()))?;
        Ok(resp.status().is_success())
    }
}

pub fn build_blob_store(config: &Config, http: reqwest::Client) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.storage_type.as_str() {
        "local" => Ok(Arc::new(FilesystemBlobStore::new(config.storage_path.clone()))),
        "minio" => {
            let endpoint = config
                .minio_endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("minio_endpoint is required when storage_type=minio"))?;
            let bucket = config
                .minio_bucket_name
                .clone()
                .ok_or_else(|| anyhow::anyhow!("minio_bucket_name is required when storage_type=minio"))?;
            Ok(Arc::new(ObjectStoreBlobStore::new(http, endpoint, bucket)))
        }
        other => anyhow::bail!("unknown storage_type: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        let doc_id = Uuid::new_v4();
        let path = store.save(doc_id, b"hello", "html").await.unwrap();
        assert!(store.exists(&path).await.unwrap());
        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded, b"hello");
        assert_eq!(sha256_hex(&loaded), sha256_hex(b"hello"));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        let err = store.load(dir.path().join("nope.html").to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, BlobStoreError::NotFound(_)));
    }
}
