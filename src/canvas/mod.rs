//! Extending a fitted image to the exact target canvas.

mod border;

pub use border::{BorderStats, BorderUniformityAnalyzer};

use crate::config::CanvasSettings;
use crate::error::{PhotoError, Result};
use crate::imaging::ImageOps;
use crate::types::{PixelBuffer, Rect, Size};
use image::{imageops, Rgb, RgbImage, Rgba, RgbaImage};
use std::sync::Arc;

/// How the margin around the pasted image was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginFill {
    /// Image already had the target size.
    Exact,
    /// Alpha image on a fully transparent canvas.
    Transparent,
    /// Flat border extended with its mean colour.
    Uniform(Rgb<u8>),
    /// Edge pixels replicated outward and softened.
    Replicated,
}

/// Places an image centred on a canvas of the target size.
#[derive(Clone)]
pub struct CanvasCompositor {
    ops: Arc<dyn ImageOps>,
    analyzer: BorderUniformityAnalyzer,
    blur_kernel: u32,
}

impl CanvasCompositor {
    pub fn new(ops: Arc<dyn ImageOps>, settings: &CanvasSettings) -> Self {
        Self {
            ops,
            analyzer: BorderUniformityAnalyzer::from_settings(settings),
            blur_kernel: settings.blur_kernel,
        }
    }

    pub fn fit(&self, image: &PixelBuffer, target: Size) -> Result<PixelBuffer> {
        self.fit_with_report(image, target).map(|(canvas, _)| canvas)
    }

    /// Like [`fit`](Self::fit), also reporting how the margin was filled.
    pub fn fit_with_report(
        &self,
        image: &PixelBuffer,
        target: Size,
    ) -> Result<(PixelBuffer, MarginFill)> {
        let _span = tracing::debug_span!("canvas_fit").entered();

        let current = image.size()?;
        if !target.contains(current) {
            return Err(PhotoError::CanvasTooSmall {
                canvas: target,
                image: current,
            });
        }
        if current == target {
            return Ok((image.clone(), MarginFill::Exact));
        }

        let roi = centered_rect(current, target);
        tracing::debug!("Placing {} at ({}, {}) on {}", current, roi.x, roi.y, target);

        match image {
            PixelBuffer::Rgba(img) => {
                let mut canvas = RgbaImage::from_pixel(target.width, target.height, Rgba([0, 0, 0, 0]));
                imageops::replace(&mut canvas, img, roi.x as i64, roi.y as i64);
                Ok((PixelBuffer::Rgba(canvas), MarginFill::Transparent))
            }
            PixelBuffer::Rgb(img) => {
                let stats = self.analyzer.analyze(img);
                if stats.is_uniform {
                    let color = stats.mean_color();
                    let mut canvas = RgbImage::from_pixel(target.width, target.height, color);
                    imageops::replace(&mut canvas, img, roi.x as i64, roi.y as i64);
                    Ok((PixelBuffer::Rgb(canvas), MarginFill::Uniform(color)))
                } else {
                    let canvas = self.replicate_and_soften(img, roi, target)?;
                    Ok((PixelBuffer::Rgb(canvas), MarginFill::Replicated))
                }
            }
        }
    }

    fn replicate_and_soften(&self, img: &RgbImage, roi: Rect, target: Size) -> Result<RgbImage> {
        let (w, h) = img.dimensions();
        let replicated = RgbImage::from_fn(target.width, target.height, |x, y| {
            let sx = (x as i64 - roi.x as i64).clamp(0, w as i64 - 1) as u32;
            let sy = (y as i64 - roi.y as i64).clamp(0, h as i64 - 1) as u32;
            *img.get_pixel(sx, sy)
        });

        let blurred = self.ops.gaussian_blur(&replicated, self.blur_kernel)?;

        // Blur only shows outside the pasted rectangle.
        let mut canvas = replicated;
        for (x, y, px) in canvas.enumerate_pixels_mut() {
            if !roi.contains_point(x, y) {
                *px = *blurred.get_pixel(x, y);
            }
        }
        Ok(canvas)
    }
}

/// Rectangle of size `inner` centred in `outer`, offsets rounded half away from zero.
pub fn centered_rect(inner: Size, outer: Size) -> Rect {
    let offset = |o: u32, i: u32| ((o - i) as f64 / 2.0).round() as u32;
    Rect::new(
        offset(outer.width, inner.width),
        offset(outer.height, inner.height),
        inner.width,
        inner.height,
    )
}
