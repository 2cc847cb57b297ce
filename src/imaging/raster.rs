use super::{sigma_for_kernel, ImageOps, Interpolation};
use crate::error::{PhotoError, Result};
use crate::types::{PixelBuffer, Size};
use fast_image_resize as fr;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{self as geo, Projection};

/// [`ImageOps`] backed by `fast_image_resize` and `imageproc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterOps;

impl RasterOps {
    pub fn new() -> Self {
        Self
    }

    fn resize_raw(
        src: Vec<u8>,
        from: (u32, u32),
        to: Size,
        pixel_type: fr::PixelType,
        interpolation: Interpolation,
    ) -> Result<Vec<u8>> {
        let src_image = fr::images::Image::from_vec_u8(from.0, from.1, src, pixel_type)
            .map_err(|e| PhotoError::InvalidImageFormat(format!("bad source buffer: {e}")))?;
        let mut dst_image = fr::images::Image::new(to.width, to.height, pixel_type);

        let filter = match interpolation {
            Interpolation::Area => fr::FilterType::Box,
            Interpolation::Cubic => fr::FilterType::CatmullRom,
        };
        // Channels are filtered independently; alpha is not premultiplied.
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(filter))
            .use_alpha(false);

        let mut resizer = fr::Resizer::new();
        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| PhotoError::InvalidImageFormat(format!("resize failed: {e}")))?;

        Ok(dst_image.into_vec())
    }
}

impl ImageOps for RasterOps {
    fn resize(
        &self,
        image: &PixelBuffer,
        size: Size,
        interpolation: Interpolation,
    ) -> Result<PixelBuffer> {
        let _span = tracing::debug_span!("resize").entered();

        let from = image.size()?;
        if from == size {
            return Ok(image.clone());
        }
        tracing::debug!("Resizing {} -> {} ({:?})", from, size, interpolation);

        let dims = (from.width, from.height);
        let overflow = || PhotoError::InvalidImageFormat("resized buffer length mismatch".into());
        match image {
            PixelBuffer::Rgb(img) => {
                let raw =
                    Self::resize_raw(img.as_raw().clone(), dims, size, fr::PixelType::U8x3, interpolation)?;
                RgbImage::from_raw(size.width, size.height, raw)
                    .map(PixelBuffer::Rgb)
                    .ok_or_else(overflow)
            }
            PixelBuffer::Rgba(img) => {
                let raw =
                    Self::resize_raw(img.as_raw().clone(), dims, size, fr::PixelType::U8x4, interpolation)?;
                RgbaImage::from_raw(size.width, size.height, raw)
                    .map(PixelBuffer::Rgba)
                    .ok_or_else(overflow)
            }
        }
    }

    fn translate(
        &self,
        image: &PixelBuffer,
        dx: f64,
        dy: f64,
        fill: Rgb<u8>,
    ) -> Result<PixelBuffer> {
        let _span = tracing::debug_span!("translate").entered();

        image.size()?;
        let projection = Projection::translate(dx as f32, dy as f32);
        let shifted = match image {
            PixelBuffer::Rgb(img) => {
                PixelBuffer::Rgb(geo::warp(img, &projection, geo::Interpolation::Bilinear, fill))
            }
            PixelBuffer::Rgba(img) => {
                let Rgb([r, g, b]) = fill;
                PixelBuffer::Rgba(geo::warp(
                    img,
                    &projection,
                    geo::Interpolation::Bilinear,
                    Rgba([r, g, b, 255]),
                ))
            }
        };
        Ok(shifted)
    }

    fn gaussian_blur(&self, image: &RgbImage, kernel: u32) -> Result<RgbImage> {
        let _span = tracing::debug_span!("gaussian_blur").entered();

        if kernel == 0 || kernel % 2 == 0 {
            return Err(PhotoError::InvalidParameters(format!(
                "blur kernel must be odd, got {kernel}"
            )));
        }
        let sigma = sigma_for_kernel(kernel);
        // imageproc panics on non-positive sigma; a 1px kernel is the identity.
        if sigma <= 0.0 || kernel == 1 {
            return Ok(image.clone());
        }
        Ok(gaussian_blur_f32(image, sigma))
    }
}
