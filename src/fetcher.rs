//! Bounded-concurrency HTTP client with retry/backoff.
//!
//! A single counting semaphore sized to `workers` is the only
//! cross-document coordination primitive; permits are released on every
//! exit path, including early returns and errors, via the guard RAII.

use crate::blob_store::{sha256_hex, BlobStore};
use crate::error::FetcherError;
use crate::parser::ContentKind;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub extension: &'static str,
    pub sha256: String,
    pub storage_path: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

pub struct FetcherPool {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    blob_store: Arc<dyn BlobStore>,
    max_retries: u32,
}

impl FetcherPool {
    pub fn new(client: reqwest::Client, workers: usize, max_retries: u32, blob_store: Arc<dyn BlobStore>) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            blob_store,
            max_retries,
        }
    }

    pub async fn fetch(&self, url: &str, doc_id: Uuid) -> Result<Option<FetchedDocument>, FetcherError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");

        for attempt in 0..self.max_retries {
            debug!(url, attempt, "fetching document");
            match self.client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Ok(None);
                }
                Ok(resp) if resp.status().is_success() => {
                    let content_type =
                        resp.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                    let kind = ContentKind::from_content_type(&content_type);
                    let bytes = resp.bytes().await.map_err(|e| FetcherError::Transient(e.to_string()))?.to_vec();
                    let sha256 = sha256_hex(&bytes);
                    let storage_path = self.blob_store.save(doc_id, &bytes, kind.extension()).await?;

                    return Ok(Some(FetchedDocument {
                        bytes,
                        content_type,
                        extension: kind.extension(),
                        sha256,
                        storage_path,
                        url: url.to_string(),
                        fetched_at: Utc::now(),
                    }));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(url, status = %resp.status(), attempt, "transient server error");
                }
                Ok(resp) => {
                    return Err(FetcherError::Transient(format!("unexpected status {}", resp.status())));
                }
                Err(e) if e.is_timeout() => {
                    warn!(url, attempt, "request timed out");
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "transient transport error");
                }
            }

            if attempt + 1 < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }

        Ok(None)
    }

    /// Fans multiple fetches out through the same semaphore; results line
    /// up positionally with `targets` so callers can match by index.
    pub async fn fetch_batch(
        &self,
        targets: &[(String, Uuid)],
    ) -> Vec<Result<Option<FetchedDocument>, FetcherError>> {
        let futures = targets.iter().map(|(url, doc_id)| self.fetch(url, *doc_id));
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::FilesystemBlobStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn pool(blob_root: &std::path::Path) -> FetcherPool {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build().unwrap();
        let store = Arc::new(FilesystemBlobStore::new(blob_root));
        FetcherPool::new(client, 2, 3, store)
    }

    #[tokio::test]
    async fn successful_fetch_stores_bytes_and_returns_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Document/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>").insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let p = pool(dir.path()).await;
        let result = p.fetch(&format!("{}/Document/1", server.uri()), Uuid::new_v4()).await.unwrap();
        let doc = result.unwrap();
        assert_eq!(doc.extension, "html");
        assert_eq!(doc.sha256, sha256_hex(b"<html>ok</html>"));
    }

    #[tokio::test]
    async fn not_found_returns_none_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/Document/404")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let p = pool(dir.path()).await;
        let result = p.fetch(&format!("{}/Document/404", server.uri()), Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());
    }
}
