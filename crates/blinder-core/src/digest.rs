//! Content hashing over decoded pixels.
//!
//! Ids are computed from the canonical RGBA8 buffer, never from encoded file
//! bytes, so the same visual content keeps its id across codecs and
//! containers.

use image::{DynamicImage, RgbaImage};
use sha2::{Digest, Sha256};

/// SHA-256 over `width ‖ height ‖ RGBA8 pixels`, lowercase hex.
pub fn pixel_digest(image: &RgbaImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_raw());
    format!("{:x}", hasher.finalize())
}

/// Digest of any decoded image after conversion to RGBA8.
pub fn image_digest(image: &DynamicImage) -> String {
    match image {
        DynamicImage::ImageRgba8(rgba) => pixel_digest(rgba),
        other => pixel_digest(&other.to_rgba8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 7]))
    }

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let d = pixel_digest(&RgbaImage::new(1, 1));
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_digest_deterministic() {
        let img = DynamicImage::ImageRgb8(gradient());
        assert_eq!(image_digest(&img), image_digest(&img.clone()));
    }

    #[test]
    fn test_digest_ignores_container() {
        let png = encode(&gradient(), ImageFormat::Png);
        let bmp = encode(&gradient(), ImageFormat::Bmp);
        assert_ne!(png, bmp, "encodings should differ byte-wise");

        let from_png = image::load_from_memory(&png).unwrap();
        let from_bmp = image::load_from_memory(&bmp).unwrap();
        assert_eq!(image_digest(&from_png), image_digest(&from_bmp));
    }

    #[test]
    fn test_digest_ignores_channel_layout() {
        let rgb = DynamicImage::ImageRgb8(gradient());
        let rgba = DynamicImage::ImageRgba8(rgb.to_rgba8());
        assert_eq!(image_digest(&rgb), image_digest(&rgba));
    }

    #[test]
    fn test_digest_sensitive_to_pixels_and_shape() {
        let a = RgbaImage::from_pixel(4, 2, image::Rgba([1, 1, 1, 255]));
        let mut b = a.clone();
        b.put_pixel(3, 1, image::Rgba([2, 1, 1, 255]));
        let c = RgbaImage::from_pixel(2, 4, image::Rgba([1, 1, 1, 255]));

        assert_ne!(pixel_digest(&a), pixel_digest(&b));
        assert_ne!(pixel_digest(&a), pixel_digest(&c), "same bytes, different shape");
    }
}
