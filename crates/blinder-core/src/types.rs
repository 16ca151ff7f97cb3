use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::digest;

/// Bounding rectangle of a detected face within its source photo, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Face embedding vector (128-dimensional for the thumbnail embedder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Embedder that produced this vector (e.g., "thumbnail-8x16").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Vectors of different dimension come from different embedding spaces and
    /// are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// A detected face: content hash, location, cropped pixels and, once computed,
/// its embedding.
///
/// `id` is derived from `image` and never changes. `embedding` is attached
/// at most once.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: String,
    pub location: Rectangle,
    pub image: RgbaImage,
    pub embedding: Option<Embedding>,
}

impl FaceRecord {
    /// Build a record from a freshly cropped face, hashing its pixels.
    pub fn from_crop(image: RgbaImage, location: Rectangle) -> Self {
        Self {
            id: digest::pixel_digest(&image),
            location,
            image,
            embedding: None,
        }
    }

    /// Reassemble a record from stored metadata and its image file.
    pub fn from_parts(meta: FaceMeta, image: RgbaImage) -> Self {
        Self {
            id: meta.id,
            location: meta.location,
            image,
            embedding: meta.embedding,
        }
    }

    /// Metadata persisted in the face store (the pixels live in `<id>.png`).
    pub fn meta(&self) -> FaceMeta {
        FaceMeta {
            id: self.id.clone(),
            location: self.location,
            embedding: self.embedding.clone(),
        }
    }

    /// Distance to another face, if both carry embeddings.
    pub fn distance(&self, other: &FaceRecord) -> Option<f32> {
        match (&self.embedding, &other.embedding) {
            (Some(a), Some(b)) => Some(a.euclidean_distance(b)),
            _ => None,
        }
    }

    pub fn width(&self) -> u32 {
        self.location.width
    }
}

/// Serialized form of a [`FaceRecord`] without pixel data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMeta {
    pub id: String,
    pub location: Rectangle,
    pub embedding: Option<Embedding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> Rectangle {
        Rectangle { x: 0, y: 0, width: 2, height: 2 }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_infinite());
    }

    #[test]
    fn test_from_crop_is_content_addressed() {
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let a = FaceRecord::from_crop(img.clone(), rect());
        let b = FaceRecord::from_crop(img, Rectangle { x: 5, y: 5, width: 2, height: 2 });
        assert_eq!(a.id, b.id, "location must not affect the id");
        assert!(a.embedding.is_none());
    }

    #[test]
    fn test_distance_requires_both_embeddings() {
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 255]));
        let mut a = FaceRecord::from_crop(img.clone(), rect());
        let mut b = FaceRecord::from_crop(img, rect());
        assert_eq!(a.distance(&b), None);

        a.embedding = Some(Embedding::new(vec![0.0, 1.0]));
        assert_eq!(a.distance(&b), None);

        b.embedding = Some(Embedding::new(vec![0.0, 0.5]));
        assert_eq!(a.distance(&b), Some(0.5));
    }

    #[test]
    fn test_meta_roundtrip_preserves_fields() {
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([1, 2, 3, 4]));
        let mut face = FaceRecord::from_crop(img.clone(), rect());
        face.embedding = Some(Embedding::new(vec![0.25; 4]));

        let json = serde_json::to_string(&face.meta()).unwrap();
        let meta: FaceMeta = serde_json::from_str(&json).unwrap();
        let back = FaceRecord::from_parts(meta, img);
        assert_eq!(back.id, face.id);
        assert_eq!(back.location, face.location);
        assert_eq!(back.embedding, face.embedding);
    }
}
