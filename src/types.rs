//! Value types shared by every pipeline stage.

use crate::error::{PhotoError, Result};
use image::{imageops, DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canvas or image dimensions in pixels. Both sides are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PhotoError::InvalidParameters(format!(
                "size must be positive, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    pub(crate) const fn new_unchecked(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// True when `other` fits inside `self` on both axes.
    pub fn contains(&self, other: Size) -> bool {
        other.width <= self.width && other.height <= self.height
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the box is non-empty and lies entirely inside an image of `size`.
    pub fn fits_within(&self, size: Size) -> bool {
        !self.is_empty() && self.right() <= size.width && self.bottom() <= size.height
    }

    /// Intersect with the image bounds; `None` when nothing is left.
    pub fn clamp_to(&self, size: Size) -> Option<Rect> {
        let x = self.x.min(size.width);
        let y = self.y.min(size.height);
        let right = self.right().min(size.width);
        let bottom = self.bottom().min(size.height);
        let clamped = Rect::new(x, y, right - x, bottom - y);
        (!clamped.is_empty()).then_some(clamped)
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x as f64 + self.width as f64 / 2.0,
            y: self.y as f64 + self.height as f64 / 2.0,
        }
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Sub-pixel position in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn midpoint(&self, other: &Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

/// Decoded image owned by whichever stage currently holds it.
///
/// Only 3-channel RGB and 4-channel RGBA byte layouts exist, so the
/// `width * height * channels` length invariant is carried by the `image` buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl PixelBuffer {
    /// Build a buffer from raw row-major bytes, rejecting length mismatches.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(PhotoError::InvalidImageFormat(format!(
                "expected {expected} bytes for {width}x{height}x{channels}, got {}",
                data.len()
            )));
        }
        let mismatch = || PhotoError::InvalidImageFormat("buffer length mismatch".into());
        match channels {
            3 => RgbImage::from_raw(width, height, data)
                .map(PixelBuffer::Rgb)
                .ok_or_else(mismatch),
            4 => RgbaImage::from_raw(width, height, data)
                .map(PixelBuffer::Rgba)
                .ok_or_else(mismatch),
            other => Err(PhotoError::InvalidImageFormat(format!(
                "unsupported channel count {other}"
            ))),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            PixelBuffer::Rgb(img) => img.width(),
            PixelBuffer::Rgba(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelBuffer::Rgb(img) => img.height(),
            PixelBuffer::Rgba(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Dimensions as a [`Size`]; zero-area buffers are rejected.
    pub fn size(&self) -> Result<Size> {
        let (width, height) = self.dimensions();
        Size::new(width, height).map_err(|_| {
            PhotoError::InvalidImageFormat(format!("image has zero area ({width}x{height})"))
        })
    }

    pub fn channels(&self) -> u8 {
        match self {
            PixelBuffer::Rgb(_) => 3,
            PixelBuffer::Rgba(_) => 4,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelBuffer::Rgba(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelBuffer::Rgb(img) => img.as_raw(),
            PixelBuffer::Rgba(img) => img.as_raw(),
        }
    }

    /// Copy out the pixels under `rect`, which must lie inside the image.
    pub fn crop(&self, rect: Rect) -> Result<PixelBuffer> {
        let size = self.size()?;
        if !rect.fits_within(size) {
            return Err(PhotoError::InvalidParameters(format!(
                "crop rectangle {}x{} at ({}, {}) is outside the {size} image",
                rect.width, rect.height, rect.x, rect.y
            )));
        }
        let (x, y, w, h) = (rect.x, rect.y, rect.width, rect.height);
        Ok(match self {
            PixelBuffer::Rgb(img) => PixelBuffer::Rgb(imageops::crop_imm(img, x, y, w, h).to_image()),
            PixelBuffer::Rgba(img) => {
                PixelBuffer::Rgba(imageops::crop_imm(img, x, y, w, h).to_image())
            }
        })
    }

    /// Colour channels only; alpha is discarded without blending.
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            PixelBuffer::Rgb(img) => img.clone(),
            PixelBuffer::Rgba(img) => RgbImage::from_fn(img.width(), img.height(), |x, y| {
                let Rgba([r, g, b, _]) = *img.get_pixel(x, y);
                Rgb([r, g, b])
            }),
        }
    }

    /// Composite over a solid colour so the result is opaque.
    pub fn flatten_onto(&self, color: Rgb<u8>) -> RgbImage {
        match self {
            PixelBuffer::Rgb(img) => img.clone(),
            PixelBuffer::Rgba(img) => RgbImage::from_fn(img.width(), img.height(), |x, y| {
                let px = img.get_pixel(x, y);
                let alpha = px[3] as f32 / 255.0;
                let blend = |fg: u8, bg: u8| {
                    (fg as f32 * alpha + bg as f32 * (1.0 - alpha))
                        .round()
                        .clamp(0.0, 255.0) as u8
                };
                Rgb([
                    blend(px[0], color[0]),
                    blend(px[1], color[1]),
                    blend(px[2], color[2]),
                ])
            }),
        }
    }
}

impl From<RgbImage> for PixelBuffer {
    fn from(img: RgbImage) -> Self {
        PixelBuffer::Rgb(img)
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(img: RgbaImage) -> Self {
        PixelBuffer::Rgba(img)
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(img: DynamicImage) -> Self {
        if img.color().has_alpha() {
            PixelBuffer::Rgba(img.into_rgba8())
        } else {
            PixelBuffer::Rgb(img.into_rgb8())
        }
    }
}

impl From<PixelBuffer> for DynamicImage {
    fn from(buffer: PixelBuffer) -> Self {
        match buffer {
            PixelBuffer::Rgb(img) => DynamicImage::ImageRgb8(img),
            PixelBuffer::Rgba(img) => DynamicImage::ImageRgba8(img),
        }
    }
}

/// What shows through wherever the matte says "background".
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundSpec {
    Solid(Rgb<u8>),
    Image(PixelBuffer),
}

impl BackgroundSpec {
    pub fn from_hex(hex: &str) -> Result<Self> {
        parse_hex_color(hex).map(BackgroundSpec::Solid)
    }
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        BackgroundSpec::Solid(Rgb([255, 255, 255]))
    }
}

/// Parse `#RRGGBB`, `RRGGBB`, `0xRRGGBB` or the short `#RGB` form.
pub fn parse_hex_color(input: &str) -> Result<Rgb<u8>> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let invalid = || PhotoError::InvalidParameters(format!("invalid hex colour '{input}'"));
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let expanded: String = match digits.len() {
        6 => digits.to_string(),
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        _ => return Err(invalid()),
    };
    let value = u32::from_str_radix(&expanded, 16).map_err(|_| invalid())?;
    Ok(Rgb([
        ((value >> 16) & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (value & 0xFF) as u8,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_length_mismatch() {
        let err = PixelBuffer::from_raw(2, 2, 3, vec![0; 11]).unwrap_err();
        assert!(matches!(err, PhotoError::InvalidImageFormat(_)));

        let ok = PixelBuffer::from_raw(2, 2, 4, vec![0; 16]).unwrap();
        assert!(ok.has_alpha());
        assert_eq!(ok.channels(), 4);
    }

    #[test]
    fn from_raw_rejects_unsupported_channels() {
        assert!(PixelBuffer::from_raw(1, 1, 2, vec![0; 2]).is_err());
    }

    #[test]
    fn zero_area_buffer_has_no_size() {
        let buffer = PixelBuffer::Rgb(RgbImage::new(0, 10));
        assert!(matches!(
            buffer.size(),
            Err(PhotoError::InvalidImageFormat(_))
        ));
    }

    #[test]
    fn parses_hex_variants() {
        assert_eq!(parse_hex_color("#FFFFFF").unwrap(), Rgb([255, 255, 255]));
        assert_eq!(parse_hex_color("0x102030").unwrap(), Rgb([16, 32, 48]));
        assert_eq!(parse_hex_color("abc").unwrap(), Rgb([0xAA, 0xBB, 0xCC]));
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#GGGGGG").is_err());
        assert!(parse_hex_color("").is_err());
    }

    #[test]
    fn clamp_to_trims_out_of_bounds_boxes() {
        let size = Size::new(100, 80).unwrap();
        let rect = Rect::new(90, 70, 20, 20).clamp_to(size).unwrap();
        assert_eq!(rect, Rect::new(90, 70, 10, 10));
        assert!(Rect::new(120, 0, 5, 5).clamp_to(size).is_none());
    }

    #[test]
    fn crop_rejects_out_of_bounds_rect() {
        let buffer = PixelBuffer::Rgb(RgbImage::new(20, 10));
        let ok = buffer.crop(Rect::new(5, 2, 15, 8)).unwrap();
        assert_eq!(ok.dimensions(), (15, 8));
        for rect in [Rect::new(6, 2, 15, 8), Rect::new(0, 0, 0, 5)] {
            assert!(matches!(
                buffer.crop(rect),
                Err(PhotoError::InvalidParameters(_))
            ));
        }
    }

    #[test]
    fn flatten_onto_blends_alpha() {
        let mut img = RgbaImage::new(1, 1);
        img.put_pixel(0, 0, Rgba([0, 0, 0, 128]));
        let flat = PixelBuffer::Rgba(img).flatten_onto(Rgb([255, 255, 255]));
        let value = flat.get_pixel(0, 0)[0];
        assert!((126..=128).contains(&value), "got {value}");
    }
}
