use super::types::AlphaMatte;
use crate::error::{PhotoError, Result};
use crate::types::Size;
use image::{imageops, ImageBuffer, Luma, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB images to matting input tensors
pub struct Preprocessor {
    size_multiple: u32,
}

impl Preprocessor {
    pub fn new(size_multiple: u32) -> Self {
        Self {
            size_multiple: size_multiple.max(1),
        }
    }

    /// Network working size: each side rounded to the nearest multiple, at least one multiple
    pub fn working_size(&self, original: Size) -> Size {
        let m = self.size_multiple;
        let round = |side: u32| ((side as f64 / m as f64).round() as u32).max(1) * m;
        Size::new_unchecked(round(original.width), round(original.height))
    }

    /// Convert an RGB image already at working size into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Convert to float and normalize to [0, 1]
    /// 2. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        tensor
    }

    /// Reshape flat model output into a `[height, width]` matte
    ///
    /// Values are kept as produced; callers clamp when blending.
    pub fn postprocess_matte(output: Vec<f32>, size: Size) -> Result<AlphaMatte> {
        let _span = tracing::debug_span!("postprocess").entered();

        let expected = size.width as usize * size.height as usize;
        if output.len() != expected {
            return Err(PhotoError::Inference(format!(
                "matte has {} elements, expected {} for {}",
                output.len(),
                expected,
                size
            )));
        }
        AlphaMatte::from_shape_vec((size.height as usize, size.width as usize), output)
            .map_err(PhotoError::inference)
    }

    /// Resize a matte to `target`, e.g. from working size back to the input size
    ///
    /// Values are clamped to [0, 1] by the resampler when a resize happens.
    pub fn resize_matte(matte: AlphaMatte, target: Size) -> Result<AlphaMatte> {
        let _span = tracing::debug_span!("resize_matte").entered();

        let (height, width) = matte.dim();
        if (width as u32, height as u32) == (target.width, target.height) {
            return Ok(matte);
        }

        let values: Vec<f32> = matte.iter().copied().collect();
        let gray: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(width as u32, height as u32, values)
                .ok_or_else(|| PhotoError::Inference("matte buffer size mismatch".into()))?;

        let resized = imageops::resize(
            &gray,
            target.width,
            target.height,
            imageops::FilterType::Lanczos3,
        );

        AlphaMatte::from_shape_vec(
            (target.height as usize, target.width as usize),
            resized.into_raw(),
        )
        .map_err(PhotoError::inference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn working_size_rounds_to_nearest_multiple() {
        let pre = Preprocessor::new(32);
        let size = pre.working_size(Size::new(400, 514).unwrap());
        assert_eq!(size, Size::new(416, 512).unwrap());
        let tiny = pre.working_size(Size::new(5, 15).unwrap());
        assert_eq!(tiny, Size::new(32, 32).unwrap());
    }

    #[test]
    fn tensor_is_channel_first_and_scaled() {
        let pre = Preprocessor::new(32);
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, Rgb([255, 0, 51]));
        let tensor = pre.preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 1]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 1]], 0.0);
        assert!((tensor[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn wrong_output_length_is_an_inference_error() {
        let err = Preprocessor::postprocess_matte(vec![0.5; 10], Size::new(4, 4).unwrap())
            .unwrap_err();
        assert!(matches!(err, PhotoError::Inference(_)));
    }

    #[test]
    fn resized_matte_matches_target_and_keeps_constant() {
        let matte = AlphaMatte::from_elem((64, 96), 1.0);
        let resized = Preprocessor::resize_matte(matte, Size::new(70, 50).unwrap()).unwrap();
        assert_eq!(resized.dim(), (50, 70));
        assert!(resized.iter().all(|&a| (a - 1.0).abs() < 1e-4));
    }
}
