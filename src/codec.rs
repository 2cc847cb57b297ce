//! Encoded image bytes and base64 data URLs.

use crate::error::{PhotoError, Result};
use crate::types::PixelBuffer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    /// PNG keeps alpha; everything else is JPEG.
    pub fn for_buffer(buffer: &PixelBuffer) -> Self {
        if buffer.has_alpha() {
            OutputFormat::Png
        } else {
            OutputFormat::Jpeg
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// Decode PNG, JPEG or any other format the `image` crate recognises.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer> {
    let _span = tracing::debug_span!("decode").entered();

    let image = image::load_from_memory(bytes)
        .map_err(|e| PhotoError::InvalidImageFormat(format!("cannot decode image: {e}")))?;
    let buffer = PixelBuffer::from(image);
    buffer.size()?;
    tracing::debug!(
        "Decoded {}x{} image with {} channels",
        buffer.width(),
        buffer.height(),
        buffer.channels()
    );
    Ok(buffer)
}

/// Decode `data:image/...;base64,<payload>`, or a bare base64 payload.
pub fn decode_data_url(input: &str) -> Result<PixelBuffer> {
    let input = input.trim();
    let payload = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                PhotoError::InvalidImageFormat("data URL has no payload".into())
            })?;
            if !header.ends_with(";base64") {
                return Err(PhotoError::InvalidImageFormat(format!(
                    "data URL is not base64 encoded ({header})"
                )));
            }
            payload
        }
        None => input,
    };

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| PhotoError::InvalidImageFormat(format!("invalid base64: {e}")))?;
    decode(&bytes)
}

/// Encode as PNG when the buffer has alpha, JPEG at `jpeg_quality` otherwise.
pub fn encode(buffer: &PixelBuffer, jpeg_quality: u8) -> Result<(Vec<u8>, OutputFormat)> {
    let _span = tracing::debug_span!("encode").entered();

    let format = OutputFormat::for_buffer(buffer);
    let mut bytes = Vec::new();
    match (format, buffer) {
        (OutputFormat::Jpeg, PixelBuffer::Rgb(img)) => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality.clamp(1, 100));
            img.write_with_encoder(encoder)?;
        }
        _ => {
            DynamicImage::from(buffer.clone())
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        }
    }
    tracing::debug!("Encoded {} bytes as {:?}", bytes.len(), format);
    Ok((bytes, format))
}

pub fn to_data_url(bytes: &[u8], format: OutputFormat) -> String {
    format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
}
