//! Image loading and model-input preparation.
//!
//! Every image is decoded, converted to grayscale, normalized to [0, 1] and
//! bilinearly resized to the model's fixed resolution. The full-resolution
//! color and grayscale copies are kept for the overlay step.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};

use crate::error::{Result, SpillError};
use crate::math::tensor::Tensor;

/// A decoded image plus the tensor the model consumes.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Full-resolution color copy, the canvas for contour drawing.
    pub color: RgbImage,
    /// Full-resolution grayscale copy; its dimensions are the target size for
    /// the resized mask.
    pub gray: GrayImage,
    /// `1 × height × width` normalized model input.
    pub input: Tensor,
}

/// Decodes `path`, distinguishing a missing file from an unparsable one.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    if !path.is_file() {
        return Err(SpillError::NotFound { path: path.to_path_buf() });
    }
    image::open(path).map_err(|e| SpillError::Decode { path: path.to_path_buf(), source: e })
}

pub fn prepare_image(path: &Path, width: u32, height: u32) -> Result<PreparedImage> {
    let decoded = load_image(path)?;
    Ok(prepare_decoded(&decoded, width, height))
}

pub fn prepare_decoded(decoded: &DynamicImage, width: u32, height: u32) -> PreparedImage {
    let color = decoded.to_rgb8();
    let gray = decoded.to_luma8();
    let input = to_model_input(&gray, width, height);
    PreparedImage { color, gray, input }
}

/// Divides every intensity by 255, then resizes to `width × height` with a
/// bilinear (triangle) filter.
pub fn to_model_input(gray: &GrayImage, width: u32, height: u32) -> Tensor {
    let (w, h) = gray.dimensions();
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(w, h, |x, y| Luma([gray.get_pixel(x, y).0[0] as f32 / 255.0]));
    let resized = if (w, h) == (width, height) {
        buffer
    } else {
        imageops::resize(&buffer, width, height, FilterType::Triangle)
    };
    let data = resized.into_raw().into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
    Tensor::from_data(1, height as usize, width as usize, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn output_is_normalized_and_resized() {
        let gray = GrayImage::from_fn(40, 30, |x, _| Luma([(x * 6) as u8]));
        let t = to_model_input(&gray, 16, 8);
        assert_eq!(t.shape(), [1, 8, 16]);
        assert!(t.data.iter().all(|v| (0.0..=1.0).contains(v)));
        // Intensity grows left to right, and survives resizing.
        let row = &t.data[..16];
        assert!(row.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn same_size_input_is_only_normalized() {
        let gray = GrayImage::from_raw(2, 1, vec![0, 255]).unwrap();
        let t = to_model_input(&gray, 2, 1);
        assert_eq!(t.data, vec![0.0, 1.0]);
    }

    #[test]
    fn rows_keep_their_place() {
        let gray = GrayImage::from_fn(3, 2, |x, y| Luma([if (x, y) == (2, 1) { 255 } else { 0 }]));
        let t = to_model_input(&gray, 3, 2);
        assert_eq!(t.data, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_and_corrupt_files_are_told_apart() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = load_image(&dir.path().join("nope.png")).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Input);

        let corrupt = dir.path().join("broken.png");
        std::fs::write(&corrupt, b"this is not a png").unwrap();
        let err = load_image(&corrupt).unwrap_err();
        assert!(matches!(err, SpillError::Decode { .. }));
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn prepared_image_keeps_full_resolution_copies() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scene.png");
        RgbImage::from_pixel(37, 23, image::Rgb([10, 200, 30])).save(&path).unwrap();
        let prepared = prepare_image(&path, 16, 8).unwrap();
        assert_eq!(prepared.color.dimensions(), (37, 23));
        assert_eq!(prepared.gray.dimensions(), (37, 23));
        assert_eq!(prepared.input.shape(), [1, 8, 16]);
    }
}
