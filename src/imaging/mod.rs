//! Raster primitives the pipeline stages are written against.

mod raster;

pub use raster::RasterOps;

use crate::error::Result;
use crate::types::{PixelBuffer, Size};
use image::{Rgb, RgbImage};

/// Resampling filter for a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Box-filter averaging, for shrinking.
    Area,
    /// Catmull-Rom cubic, for enlarging.
    Cubic,
}

impl Interpolation {
    /// Area when either side shrinks, cubic otherwise.
    pub fn for_scale(from: Size, to: Size) -> Self {
        if to.width < from.width || to.height < from.height {
            Interpolation::Area
        } else {
            Interpolation::Cubic
        }
    }
}

/// Image operations needed by the resize, canvas, matting and centering stages.
///
/// Implementations must be shareable across request threads.
pub trait ImageOps: Send + Sync {
    /// Resize to exactly `size`. Every channel, alpha included, is filtered independently.
    fn resize(
        &self,
        image: &PixelBuffer,
        size: Size,
        interpolation: Interpolation,
    ) -> Result<PixelBuffer>;

    /// Shift content by `(dx, dy)` with bilinear sampling; uncovered pixels get `fill` (opaque).
    fn translate(&self, image: &PixelBuffer, dx: f64, dy: f64, fill: Rgb<u8>)
        -> Result<PixelBuffer>;

    /// Gaussian blur with an odd square kernel side.
    fn gaussian_blur(&self, image: &RgbImage, kernel: u32) -> Result<RgbImage>;
}

/// Sigma OpenCV derives for a kernel of side `kernel` when none is given.
pub fn sigma_for_kernel(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}
