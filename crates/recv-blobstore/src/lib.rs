//! Idempotency and signed-URL caching adapter over a [`BlobStore`] (C3).
//!
//! Wraps any concrete [`BlobStore`] implementation with the two pieces of
//! "idempotent put/get/sign" that are store-agnostic: a same-ref-different-
//! bytes conflict is caught in memory before it ever reaches the backing
//! store, and a `sign` call for a ref whose previously issued URL has not
//! yet expired is served from cache instead of hitting the store again.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use recv_core::BlobStore;
use recv_error::{ErrorCode, PipelineError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Wraps an inner [`BlobStore`] with idempotent-put tracking and signed-URL
/// caching.
pub struct IdempotentBlobStore<S> {
    inner: S,
    known_hashes: Arc<Mutex<HashMap<String, String>>>,
    signed_urls: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl<S: BlobStore> IdempotentBlobStore<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            known_hashes: Arc::new(Mutex::new(HashMap::new())),
            signed_urls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Borrow the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for IdempotentBlobStore<S> {
    async fn put(&self, blob_ref: &str, bytes: &[u8], mime: &str) -> Result<(), PipelineError> {
        let hash = recv_hash::content_hash(bytes);
        let mut known = self.known_hashes.lock().await;
        match known.get(blob_ref) {
            Some(existing) if existing == &hash => {
                // Already written with identical bytes; no-op per the put contract.
                Ok(())
            }
            Some(_) => Err(PipelineError::new(
                ErrorCode::Conflict,
                format!("blob_ref '{blob_ref}' already holds different content"),
            )),
            None => {
                self.inner.put(blob_ref, bytes, mime).await?;
                known.insert(blob_ref.to_string(), hash);
                Ok(())
            }
        }
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, PipelineError> {
        self.inner.get(blob_ref).await
    }

    async fn sign(&self, blob_ref: &str, ttl: Duration) -> Result<String, PipelineError> {
        let now = Instant::now();
        let mut cache = self.signed_urls.lock().await;
        if let Some((url, expires_at)) = cache.get(blob_ref)
            && *expires_at > now
        {
            return Ok(url.clone());
        }
        let url = self.inner.sign(blob_ref, ttl).await?;
        cache.insert(blob_ref.to_string(), (url.clone(), now + ttl));
        Ok(url)
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), PipelineError> {
        self.inner.delete(blob_ref).await?;
        self.known_hashes.lock().await.remove(blob_ref);
        self.signed_urls.lock().await.remove(blob_ref);
        Ok(())
    }
}
