//! Thin HTTP client over a configured text-embedding endpoint, plus local
//! token counting/chunking.
//!
//! Chunking here is word-boundary based rather than a byte-pair tokenizer:
//! it trades exact provider-token-count fidelity for the one law the
//! pipeline actually depends on — concatenating the decoded chunks
//! reconstructs the input exactly. A true BPE tokenizer's independently
//! decoded slices are not guaranteed to do that at chunk boundaries.

use crate::error::ProviderError;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
    fn count_tokens(&self, text: &str) -> usize;
    fn chunk_text(&self, text: &str, max_tokens: usize) -> Vec<String>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponseItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingResponseItem>,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    batch_size: usize,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        client: reqwest::Client,
        api_base: String,
        api_key: Option<String>,
        model: String,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            api_base,
            api_key,
            model,
            dimension,
            batch_size,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(4096).unwrap())),
        }
    }

    fn cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut to_fetch = Vec::new();

        {
            let mut cache = self.cache.lock();
            for (i, text) in texts.iter().enumerate() {
                if let Some(v) = cache.get(&Self::cache_key(text)) {
                    results[i] = Some(v.clone());
                } else {
                    to_fetch.push(i);
                }
            }
        }

        for batch in to_fetch.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let mut req = self
                .client
                .post(format!("{}/embeddings", self.api_base.trim_end_matches('/')))
                .json(&EmbeddingRequest { model: &self.model, input: &batch_texts });
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| ProviderError::Request(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::Request(format!("provider returned {}", resp.status())));
            }
            let parsed: EmbeddingResponse =
                resp.json().await.map_err(|e| ProviderError::Request(e.to_string()))?;

            if parsed.data.len() != batch.len() {
                return Err(ProviderError::Request(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    parsed.data.len()
                )));
            }

            let mut cache = self.cache.lock();
            for (&idx, item) in batch.iter().zip(parsed.data.into_iter()) {
                if item.embedding.len() != self.dimension {
                    return Err(ProviderError::BadDimension { got: item.embedding.len(), want: self.dimension });
                }
                cache.put(Self::cache_key(&texts[idx]), item.embedding.clone());
                results[idx] = Some(item.embedding);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every index is either cached or fetched")).collect())
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn chunk_text(&self, text: &str, max_tokens: usize) -> Vec<String> {
        if max_tokens == 0 || text.is_empty() {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_words = 0;

        for word in SplitKeepWhitespace::new(text) {
            let is_whitespace = word.chars().all(char::is_whitespace);
            if !is_whitespace {
                if current_words == max_tokens {
                    chunks.push(std::mem::take(&mut current));
                    current_words = 0;
                }
                current_words += 1;
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        if chunks.is_empty() {
            chunks.push(String::new());
        }
        chunks
    }
}

/// Splits text into alternating word / whitespace-run tokens, preserving
/// every byte of the original so the pieces concatenate back exactly.
struct SplitKeepWhitespace<'a> {
    rest: &'a str,
}

impl<'a> SplitKeepWhitespace<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for SplitKeepWhitespace<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let is_ws = self.rest.chars().next().unwrap().is_whitespace();
        let split_at = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace() != is_ws)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(split_at);
        self.rest = rest;
        Some(token)
    }
}

pub fn build_embedding_provider(
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    batch_size: usize,
) -> Arc<dyn EmbeddingProvider> {
    Arc::new(HttpEmbeddingProvider::new(client, api_base, api_key, model, dimension, batch_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(reqwest::Client::new(), "http://localhost".into(), None, "m".into(), 4, 8)
    }

    #[test]
    fn chunk_concat_reconstructs_input() {
        let p = provider();
        let text = "the quick  brown fox jumps over the lazy dog again and again";
        let chunks = p.chunk_text(text, 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunk_respects_max_tokens_per_chunk() {
        let p = provider();
        let text = "a b c d e f g";
        let chunks = p.chunk_text(text, 2);
        for c in &chunks {
            assert!(p.count_tokens(c) <= 2);
        }
    }

    #[test]
    fn empty_text_yields_single_empty_chunk() {
        let p = provider();
        assert_eq!(p.chunk_text("", 10), vec![""]);
    }
}
