//! Embedding cache with single-flight computation.
//!
//! Embeddings are keyed by face id in `<workdir>/embedding.store`. Concurrent
//! requests for the same id share one computation: the first caller runs the
//! embedder, the rest await its result.

use crate::embedder::Embedder;
use crate::error::BlinderError;
use crate::store::{KvStore, StoreError};
use crate::types::{Embedding, FaceRecord};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

pub const EMBEDDING_STORE_DIR: &str = "embedding.store";

type InFlight = Arc<OnceCell<Embedding>>;

pub struct EmbeddingCache {
    embedder: Arc<dyn Embedder>,
    store: Arc<KvStore<Embedding>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl EmbeddingCache {
    pub async fn open(workdir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        Ok(Self {
            embedder,
            store: Arc::new(KvStore::open(workdir.join(EMBEDDING_STORE_DIR)).await?),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Shared handle to the underlying id → embedding store.
    pub fn store(&self) -> Arc<KvStore<Embedding>> {
        Arc::clone(&self.store)
    }

    /// Embedding for `face`.
    ///
    /// Returns the attached embedding if there is one, then the persisted
    /// one, and only then calls the embedder. The embedder runs at most once
    /// per id, even under concurrent calls.
    pub async fn embedding(&self, face: &FaceRecord) -> Result<Embedding, BlinderError> {
        if let Some(embedding) = &face.embedding {
            return Ok(embedding.clone());
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(face.id.clone()).or_default())
        };

        let result = cell
            .get_or_try_init(|| self.load_or_compute(face))
            .await
            .cloned();

        // Once persisted, the store answers future requests.
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&face.id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&face.id);
        }

        result
    }

    async fn load_or_compute(&self, face: &FaceRecord) -> Result<Embedding, BlinderError> {
        if let Some(embedding) = self.store.get(&face.id).await? {
            tracing::debug!(id = %face.id, "embedding cache hit");
            return Ok(embedding);
        }

        let embedding = self
            .embedder
            .embed(&face.image)
            .await
            .map_err(|source| BlinderError::EmbeddingFailed {
                id: face.id.clone(),
                source,
            })?;

        self.store.put(&face.id, &embedding).await?;
        tracing::info!(id = %face.id, dim = embedding.dim(), "embedding computed");
        Ok(embedding)
    }

    /// Record an embedding computed elsewhere (used when reindexing).
    pub async fn put(&self, id: &str, embedding: &Embedding) -> Result<(), StoreError> {
        self.store.put(id, embedding).await
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }

    pub async fn destroy(&self) -> Result<(), StoreError> {
        self.store.destroy().await
    }
}
