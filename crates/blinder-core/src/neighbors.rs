//! Nearest-neighbor search over stored embeddings.

use crate::store::{KvStore, StoreError};
use crate::types::Embedding;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

/// A stored face within the search threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

/// Strategy for finding stored faces close to a probe embedding.
///
/// Results are ordered closest first, ties by id, and never contain
/// `exclude`.
#[async_trait]
pub trait NeighborIndex: Send + Sync {
    async fn find_neighbors(
        &self,
        probe: &Embedding,
        threshold: f32,
        exclude: Option<&str>,
    ) -> Result<Vec<Neighbor>, StoreError>;
}

/// Exhaustive scan of the embedding store. O(n) per query.
///
/// Entries deleted while the scan runs are skipped; entries added while it
/// runs may or may not be seen.
pub struct LinearScan {
    store: Arc<KvStore<Embedding>>,
}

impl LinearScan {
    pub fn new(store: Arc<KvStore<Embedding>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NeighborIndex for LinearScan {
    async fn find_neighbors(
        &self,
        probe: &Embedding,
        threshold: f32,
        exclude: Option<&str>,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let ids = self.store.keys().await?;
        let scanned = ids.len();
        let mut neighbors = Vec::new();

        for id in ids {
            if exclude == Some(id.as_str()) {
                continue;
            }
            let Some(other) = self.store.get(&id).await? else {
                tracing::warn!(%id, "embedding vanished during scan");
                continue;
            };

            let distance = probe.euclidean_distance(&other);
            tracing::trace!(%id, distance, threshold, "scan");
            if distance <= threshold {
                neighbors.push(Neighbor { id, distance });
            }
        }

        sort_neighbors(&mut neighbors);
        tracing::debug!(scanned, found = neighbors.len(), threshold, "linear scan");
        Ok(neighbors)
    }
}

/// Closest first; equal distances ordered by id for stable output.
pub fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
