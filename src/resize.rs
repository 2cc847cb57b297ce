//! Aspect-preserving fit into a target box.

use crate::error::Result;
use crate::imaging::{ImageOps, Interpolation};
use crate::types::{PixelBuffer, Size};
use std::sync::Arc;

/// Scales an image so it fits inside a target box without changing its aspect ratio.
#[derive(Clone)]
pub struct ResizeStrategy {
    ops: Arc<dyn ImageOps>,
}

impl ResizeStrategy {
    pub fn new(ops: Arc<dyn ImageOps>) -> Self {
        Self { ops }
    }

    /// Largest size with the image's aspect ratio that fits in `target`.
    ///
    /// Sides are rounded to the nearest pixel and never drop below 1.
    pub fn fit_size(image: Size, target: Size) -> Size {
        if image == target {
            return target;
        }
        let aspect = image.aspect();
        let (width, height) = if aspect > target.aspect() {
            let height = (target.width as f64 / aspect).round() as u32;
            (target.width, height)
        } else {
            let width = (target.height as f64 * aspect).round() as u32;
            (width, target.height)
        };
        Size::new_unchecked(
            width.clamp(1, target.width),
            height.clamp(1, target.height),
        )
    }

    pub fn fit(&self, image: &PixelBuffer, target: Size) -> Result<PixelBuffer> {
        let _span = tracing::debug_span!("fit").entered();

        let current = image.size()?;
        let fitted = Self::fit_size(current, target);
        if fitted == current {
            return Ok(image.clone());
        }

        let interpolation = Interpolation::for_scale(current, fitted);
        tracing::debug!("Fitting {} into {} as {}", current, target, fitted);
        self.ops.resize(image, fitted, interpolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RasterOps;
    use image::{Rgb, RgbImage};

    fn size(w: u32, h: u32) -> Size {
        Size::new(w, h).unwrap()
    }

    #[test]
    fn wide_image_is_width_bound() {
        assert_eq!(ResizeStrategy::fit_size(size(800, 600), size(400, 514)), size(400, 300));
    }

    #[test]
    fn tall_image_is_height_bound() {
        assert_eq!(ResizeStrategy::fit_size(size(300, 900), size(600, 600)), size(200, 600));
    }

    #[test]
    fn extreme_aspect_never_collapses() {
        assert_eq!(ResizeStrategy::fit_size(size(10_000, 1), size(100, 100)), size(100, 1));
    }

    #[test]
    fn fit_is_idempotent() {
        let strategy = ResizeStrategy::new(Arc::new(RasterOps::new()));
        let image = PixelBuffer::Rgb(RgbImage::from_pixel(800, 600, Rgb([1, 2, 3])));
        let target = size(413, 531);
        let once = strategy.fit(&image, target).unwrap();
        let twice = strategy.fit(&once, target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn result_fits_and_touches_one_side() {
        let strategy = ResizeStrategy::new(Arc::new(RasterOps::new()));
        let image = PixelBuffer::Rgb(RgbImage::new(123, 457));
        let target = size(300, 300);
        let out = strategy.fit(&image, target).unwrap().size().unwrap();
        assert!(target.contains(out));
        assert!(out.width == target.width || out.height == target.height);
        let drift = (out.aspect() - 123.0 / 457.0).abs();
        assert!(drift < 1.0 / out.width.min(out.height) as f64 + 0.01);
    }
}
