//! The face memory engine.
//!
//! `FaceBlinder` owns the stores and caches under one work directory and
//! exposes the caller-facing operations: see, similar, recognize, naming and
//! label propagation. Opening it is the only way to get one; `close` and
//! `destroy` consume it.

use crate::alignment::AlignmentCache;
use crate::config::Config;
use crate::detector::Detector;
use crate::embedder::Embedder;
use crate::embedding::EmbeddingCache;
use crate::error::BlinderError;
use crate::face_store::FaceStore;
use crate::name_store::NameStore;
use crate::neighbors::{LinearScan, NeighborIndex};
use crate::recognizer::{Ballot, LogCountScorer, Scorer};
use crate::types::FaceRecord;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FaceBlinder {
    config: Config,
    faces: FaceStore,
    names: NameStore,
    alignments: AlignmentCache,
    embeddings: EmbeddingCache,
    index: Box<dyn NeighborIndex>,
    scorer: Box<dyn Scorer>,
}

impl FaceBlinder {
    /// Validate `config`, create the work directory and open every store.
    pub async fn open(
        config: Config,
        detector: Arc<dyn Detector>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, BlinderError> {
        config.validate()?;
        let workdir = config.workdir.as_path();
        tokio::fs::create_dir_all(workdir).await?;

        let faces = FaceStore::open(workdir).await?;
        let names = NameStore::open(workdir).await?;
        let alignments = AlignmentCache::open(workdir, detector).await?;
        let embeddings = EmbeddingCache::open(workdir, embedder).await?;
        let index = Box::new(LinearScan::new(embeddings.store()));

        tracing::info!(
            workdir = %workdir.display(),
            threshold = config.threshold,
            min_size = config.min_size,
            "face blinder opened"
        );

        Ok(Self {
            config,
            faces,
            names,
            alignments,
            embeddings,
            index,
            scorer: Box::new(LogCountScorer),
        })
    }

    /// Replace the default linear scan with another neighbor index.
    pub fn with_index(mut self, index: Box<dyn NeighborIndex>) -> Self {
        self.index = index;
        self
    }

    /// Replace the default label scoring.
    pub fn with_scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Detect the faces in `photo`, embed each and persist them.
    ///
    /// Faces narrower than `min_size` are dropped. Embeddings for the
    /// remaining faces run concurrently, up to `embed_concurrency` at a time;
    /// any failure fails the whole call.
    pub async fn see(&self, photo: &Path) -> Result<Vec<FaceRecord>, BlinderError> {
        tracing::debug!(photo = %photo.display(), "see");

        let aligned = self.alignments.align(photo, &self.faces).await?;
        let min_size = self.config.min_size;
        let big: Vec<FaceRecord> = aligned
            .into_iter()
            .filter(|face| {
                let keep = face.width() >= min_size;
                if !keep {
                    tracing::info!(
                        id = %face.id,
                        width = face.location.width,
                        height = face.location.height,
                        min_size,
                        "face too small, skipped"
                    );
                }
                keep
            })
            .collect();

        futures::stream::iter(big)
            .map(|face| self.complete(face))
            .buffered(self.config.embed_concurrency)
            .try_collect()
            .await
    }

    /// Attach and persist an embedding if the face lacks one.
    async fn complete(&self, mut face: FaceRecord) -> Result<FaceRecord, BlinderError> {
        if face.embedding.is_none() {
            face.embedding = Some(self.embeddings.embedding(&face).await?);
            self.faces.put(&face).await?;
        }
        Ok(face)
    }

    /// Stored faces within the configured threshold of `face`.
    pub async fn similar(&self, face: &FaceRecord) -> Result<Vec<FaceRecord>, BlinderError> {
        self.similar_within(face, self.config.threshold).await
    }

    /// Stored faces within `threshold` of `face`, closest first.
    ///
    /// `face` itself is never included. A face without an embedding has no
    /// neighbors.
    pub async fn similar_within(
        &self,
        face: &FaceRecord,
        threshold: f32,
    ) -> Result<Vec<FaceRecord>, BlinderError> {
        Ok(self
            .neighbors(face, threshold)
            .await?
            .into_iter()
            .map(|(neighbor, _)| neighbor)
            .collect())
    }

    async fn neighbors(
        &self,
        face: &FaceRecord,
        threshold: f32,
    ) -> Result<Vec<(FaceRecord, f32)>, BlinderError> {
        let Some(probe) = &face.embedding else {
            tracing::warn!(id = %face.id, "face has no embedding; no neighbors");
            return Ok(Vec::new());
        };

        let hits = self
            .index
            .find_neighbors(probe, threshold, Some(face.id.as_str()))
            .await?;

        let mut found = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(other) = self.faces.get(&hit.id).await? else {
                tracing::warn!(id = %hit.id, "neighbor vanished from face store; skipped");
                continue;
            };
            if other.width() < self.config.min_size {
                tracing::debug!(id = %other.id, width = other.width(), "neighbor too small, skipped");
                continue;
            }
            found.push((other, hit.distance));
        }
        Ok(found)
    }

    /// Best-guess label for `face`, or `None` for unknown.
    ///
    /// A face that already has a label gets it back directly. Otherwise the
    /// labeled neighbors vote and the lowest-scoring label wins.
    pub async fn recognize(&self, face: &FaceRecord) -> Result<Option<String>, BlinderError> {
        if let Some(label) = self.names.get_name(&face.id).await? {
            tracing::debug!(id = %face.id, %label, "recognized by own label");
            return Ok(Some(label));
        }

        let mut ballot = Ballot::new();
        for (neighbor, distance) in self.neighbors(face, self.config.threshold).await? {
            if let Some(label) = self.names.get_name(&neighbor.id).await? {
                ballot.cast(label, distance);
            }
        }

        let winner = ballot.winner(self.scorer.as_ref());
        tracing::debug!(id = %face.id, winner = ?winner, "recognized by vote");
        Ok(winner)
    }

    /// Label a stored face. Faces that were never seen cannot be named.
    pub async fn set_name(&self, face: &FaceRecord, label: &str) -> Result<(), BlinderError> {
        if self.faces.meta(&face.id).await?.is_none() {
            return Err(BlinderError::InvalidState(format!(
                "cannot name face {} which is not stored",
                face.id
            )));
        }
        tracing::info!(id = %face.id, label, "remember");
        Ok(self.names.set_name(&face.id, label).await?)
    }

    pub async fn get_name(&self, face: &FaceRecord) -> Result<Option<String>, BlinderError> {
        Ok(self.names.get_name(&face.id).await?)
    }

    /// Drop the label of `face`. Returns whether it had one.
    pub async fn forget(&self, face: &FaceRecord) -> Result<bool, BlinderError> {
        tracing::info!(id = %face.id, "forget");
        Ok(self.names.delete_name(&face.id).await?)
    }

    /// Give the label of `face` to every unlabeled neighbor. One hop only;
    /// labels are not spread further from the newly labeled faces.
    ///
    /// Returns the number of faces labeled.
    pub async fn remember_similar(&self, face: &FaceRecord) -> Result<usize, BlinderError> {
        let Some(label) = self.names.get_name(&face.id).await? else {
            return Err(BlinderError::InvalidState(format!(
                "cannot propagate a label that does not exist (face {})",
                face.id
            )));
        };

        let mut labeled = 0;
        for (neighbor, _) in self.neighbors(face, self.config.threshold).await? {
            if self.names.get_name(&neighbor.id).await?.is_some() {
                continue;
            }
            self.names.set_name(&neighbor.id, &label).await?;
            labeled += 1;
        }

        tracing::info!(id = %face.id, %label, labeled, "propagated label");
        Ok(labeled)
    }

    /// Path of the stored image for `face`.
    pub fn file(&self, face: &FaceRecord) -> PathBuf {
        self.faces.file_path(&face.id)
    }

    /// Stored face by full id.
    pub async fn face(&self, id: &str) -> Result<Option<FaceRecord>, BlinderError> {
        Ok(self.faces.get(id).await?)
    }

    /// Stored ids beginning with `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BlinderError> {
        Ok(self.faces.list(prefix).await?)
    }

    /// Rebuild the embedding store from face metadata. Returns the number of
    /// embeddings written.
    pub async fn reindex_embeddings(&self) -> Result<usize, BlinderError> {
        let mut written = 0;
        for id in self.faces.ids().await? {
            let embedding = self.faces.meta(&id).await?.and_then(|meta| meta.embedding);
            match embedding {
                Some(embedding) => {
                    self.embeddings.put(&id, &embedding).await?;
                    written += 1;
                }
                None => tracing::debug!(%id, "no embedding to reindex"),
            }
        }
        tracing::info!(written, "embedding store reindexed");
        Ok(written)
    }

    /// Close every store, keeping the data.
    pub async fn close(self) -> Result<(), BlinderError> {
        let results = [
            self.names.close().await,
            self.faces.close().await,
            self.embeddings.close().await,
            self.alignments.close().await,
        ];
        let mut first_err = None;
        for result in results {
            if let Err(e) = result {
                tracing::error!(error = %e, "close failed");
                first_err.get_or_insert(e);
            }
        }
        tracing::info!("face blinder closed");
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Close every store and delete the whole work directory.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned afterwards.
    pub async fn destroy(self) -> Result<(), BlinderError> {
        let mut first_err: Option<BlinderError> = None;

        let stores = [
            self.names.destroy().await,
            self.faces.destroy().await,
            self.embeddings.destroy().await,
            self.alignments.destroy().await,
        ];
        for result in stores {
            if let Err(e) = result {
                tracing::error!(error = %e, "destroy: store cleanup failed");
                first_err.get_or_insert(e.into());
            }
        }

        let workdir = &self.config.workdir;
        match tokio::fs::remove_dir_all(workdir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::error!(error = %e, workdir = %workdir.display(), "destroy: workdir removal failed");
                first_err.get_or_insert(e.into());
            }
            _ => {}
        }

        tracing::info!(workdir = %workdir.display(), "face blinder destroyed");
        first_err.map_or(Ok(()), Err)
    }
}
