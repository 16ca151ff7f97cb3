//! Face detection seam.
//!
//! A [`Detector`] turns a decoded photo into cropped faces with their
//! rectangles. Implementations must be deterministic: identical photos must
//! yield identical crops in identical order, or content addressing breaks.

use crate::types::Rectangle;
use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("unreadable image {path}: {reason}")]
    UnreadableImage { path: String, reason: String },
    #[error("detector failed: {0}")]
    Failed(String),
}

/// One face found in a photo.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub image: RgbaImage,
    pub location: Rectangle,
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect and crop faces, in the detector's own stable order.
    async fn detect(&self, photo: &DynamicImage) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// Treats the whole photo as a single face.
///
/// Useful for photos that are already face crops (avatars, ID photos) and as
/// a model-free baseline. With `square` set, the largest centered square is
/// taken instead of the full frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeImageDetector {
    pub square: bool,
}

impl WholeImageDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn square() -> Self {
        Self { square: true }
    }

    fn crop_rect(&self, width: u32, height: u32) -> Rectangle {
        if !self.square {
            return Rectangle { x: 0, y: 0, width, height };
        }
        let side = width.min(height);
        Rectangle {
            x: (width - side) / 2,
            y: (height - side) / 2,
            width: side,
            height: side,
        }
    }
}

#[async_trait]
impl Detector for WholeImageDetector {
    async fn detect(&self, photo: &DynamicImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let (width, height) = (photo.width(), photo.height());
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let location = self.crop_rect(width, height);
        let image = photo
            .crop_imm(location.x, location.y, location.width, location.height)
            .to_rgba8();

        tracing::debug!(?location, "whole-image detector: one face");
        Ok(vec![DetectedFace { image, location }])
    }
}
