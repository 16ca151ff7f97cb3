//! Alignment cache: detection results memoized by photo content.
//!
//! Maps the pixel digest of a photo to the ordered ids of the faces found in
//! it. A hit returns the stored faces without running the detector.

use crate::detector::{Detector, DetectorError};
use crate::digest;
use crate::error::BlinderError;
use crate::face_store::FaceStore;
use crate::store::{KvStore, StoreError};
use crate::types::FaceRecord;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;

pub const ALIGNMENT_STORE_DIR: &str = "alignment.store";

pub struct AlignmentCache {
    detector: Arc<dyn Detector>,
    store: KvStore<Vec<String>>,
}

impl AlignmentCache {
    pub async fn open(workdir: &Path, detector: Arc<dyn Detector>) -> Result<Self, StoreError> {
        Ok(Self {
            detector,
            store: KvStore::open(workdir.join(ALIGNMENT_STORE_DIR)).await?,
        })
    }

    /// Faces in `photo`, in detector order. Each new face is persisted to
    /// `faces` (without an embedding) before returning.
    ///
    /// Nothing is returned or cached if the photo cannot be read or the
    /// detector fails.
    pub async fn align(
        &self,
        photo: &Path,
        faces: &FaceStore,
    ) -> Result<Vec<FaceRecord>, BlinderError> {
        let (image, photo_id) = load_photo(photo).await?;

        if let Some(ids) = self.store.get(&photo_id).await? {
            if let Some(cached) = load_all(faces, &ids).await? {
                tracing::debug!(photo = %photo.display(), %photo_id, faces = cached.len(), "alignment cache hit");
                return Ok(cached);
            }
            tracing::warn!(%photo_id, "cached faces missing from store; detecting again");
        }

        let detected = self.detector.detect(&image).await?;
        tracing::info!(photo = %photo.display(), %photo_id, faces = detected.len(), "detected faces");

        let records: Vec<FaceRecord> = detected
            .into_iter()
            .map(|d| FaceRecord::from_crop(d.image, d.location))
            .collect();

        for record in &records {
            faces.put(record).await?;
        }
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.store.put(&photo_id, &ids).await?;

        Ok(records)
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }

    pub async fn destroy(&self) -> Result<(), StoreError> {
        self.store.destroy().await
    }
}

/// Read and decode a photo off the async runtime, returning it with its
/// pixel digest.
async fn load_photo(photo: &Path) -> Result<(DynamicImage, String), DetectorError> {
    let unreadable = |reason: String| DetectorError::UnreadableImage {
        path: photo.display().to_string(),
        reason,
    };

    let bytes = tokio::fs::read(photo)
        .await
        .map_err(|e| unreadable(e.to_string()))?;

    let decoded = tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map(|img| {
            let id = digest::image_digest(&img);
            (img, id)
        })
    })
    .await
    .map_err(|e| DetectorError::Failed(format!("decode task: {e}")))?;

    decoded.map_err(|e| unreadable(e.to_string()))
}

/// All records for `ids`, or `None` if any has gone missing.
async fn load_all(faces: &FaceStore, ids: &[String]) -> Result<Option<Vec<FaceRecord>>, StoreError> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        match faces.get(id).await? {
            Some(face) => records.push(face),
            None => return Ok(None),
        }
    }
    Ok(Some(records))
}
