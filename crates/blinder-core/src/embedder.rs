//! Face embedding seam.
//!
//! An [`Embedder`] maps a cropped face to a fixed-length vector. Like the
//! detector it must be deterministic for identical pixels.

use crate::types::Embedding;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use thiserror::Error;

// --- Thumbnail embedder constants ---
const THUMB_WIDTH: u32 = 8;
const THUMB_HEIGHT: u32 = 16;
const THUMB_MEAN: f32 = 127.5;
const THUMB_STD: f32 = 127.5;
const THUMB_MODEL_VERSION: &str = "thumbnail-8x16";

/// Dimension of vectors produced by [`ThumbnailEmbedder`].
pub const THUMBNAIL_EMBEDDING_DIM: usize = (THUMB_WIDTH * THUMB_HEIGHT) as usize;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("face crop is empty")]
    EmptyImage,
    #[error("embedder failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, face: &RgbaImage) -> Result<Embedding, EmbedderError>;
}

/// Model-free baseline: a normalized grayscale thumbnail of the face.
///
/// Downscales to 8×16 with bilinear filtering, centers pixel values on zero,
/// then L2-normalizes, so distances fall in [0, 2].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailEmbedder;

impl ThumbnailEmbedder {
    fn extract(face: &RgbaImage) -> Result<Embedding, EmbedderError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedderError::EmptyImage);
        }

        let gray = imageops::grayscale(face);
        let thumb = imageops::resize(&gray, THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle);

        let raw: Vec<f32> = thumb
            .pixels()
            .map(|p| (p.0[0] as f32 - THUMB_MEAN) / THUMB_STD)
            .collect();

        // L2-normalize
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(THUMB_MODEL_VERSION.to_string()),
        })
    }
}

#[async_trait]
impl Embedder for ThumbnailEmbedder {
    async fn embed(&self, face: &RgbaImage) -> Result<Embedding, EmbedderError> {
        let face = face.clone();
        tokio::task::spawn_blocking(move || Self::extract(&face))
            .await
            .map_err(|e| EmbedderError::Failed(format!("embed task: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            let v = if (x / 4 + y / 4) % 2 == 0 { 30 } else { 220 };
            Rgba([v, v, v, 255])
        })
    }

    #[tokio::test]
    async fn test_output_dimension() {
        let e = ThumbnailEmbedder.embed(&checker(64, 64)).await.unwrap();
        assert_eq!(e.dim(), THUMBNAIL_EMBEDDING_DIM);
        assert_eq!(e.model_version.as_deref(), Some(THUMB_MODEL_VERSION));
    }

    #[tokio::test]
    async fn test_unit_norm() {
        let e = ThumbnailEmbedder.embed(&checker(40, 80)).await.unwrap();
        let norm: f32 = e.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm = {norm}");
    }

    #[tokio::test]
    async fn test_deterministic() {
        let img = checker(33, 47);
        let a = ThumbnailEmbedder.embed(&img).await.unwrap();
        let b = ThumbnailEmbedder.embed(&img).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_scale_invariant_for_uniform_faces() {
        let small = RgbaImage::from_pixel(10, 20, Rgba([200, 200, 200, 255]));
        let large = RgbaImage::from_pixel(80, 160, Rgba([200, 200, 200, 255]));
        let a = ThumbnailEmbedder.embed(&small).await.unwrap();
        let b = ThumbnailEmbedder.embed(&large).await.unwrap();
        assert!(a.euclidean_distance(&b) < 1e-4);
    }

    #[tokio::test]
    async fn test_inverted_face_is_far() {
        let img = checker(32, 32);
        let mut inverted = img.clone();
        imageops::invert(&mut inverted);
        let a = ThumbnailEmbedder.embed(&img).await.unwrap();
        let b = ThumbnailEmbedder.embed(&inverted).await.unwrap();
        assert!(a.euclidean_distance(&b) > 1.0);
    }

    #[tokio::test]
    async fn test_empty_image_rejected() {
        let err = ThumbnailEmbedder.embed(&RgbaImage::new(0, 0)).await.unwrap_err();
        assert!(matches!(err, EmbedderError::EmptyImage));
    }
}
