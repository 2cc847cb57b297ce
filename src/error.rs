use crate::types::Size;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PhotoError>;

/// Failures surfaced by the normalization pipeline.
///
/// Every variant aborts the request it occurred in; nothing here is retried.
#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("canvas {canvas} is smaller than image {image}")]
    CanvasTooSmall { canvas: Size, image: Size },

    #[error("no face detected")]
    NoFaceDetected,

    #[error("expected two eyes inside the detected face, found {found}")]
    InsufficientEyesDetected { found: usize },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl PhotoError {
    /// Whether the caller can fix this by submitting a different photo or parameters.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            PhotoError::InvalidParameters(_)
                | PhotoError::InvalidImageFormat(_)
                | PhotoError::NoFaceDetected
                | PhotoError::InsufficientEyesDetected { .. }
        )
    }

    pub(crate) fn inference(err: impl std::fmt::Display) -> Self {
        PhotoError::Inference(err.to_string())
    }
}

impl From<image::ImageError> for PhotoError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => PhotoError::Io(io),
            other => PhotoError::InvalidImageFormat(other.to_string()),
        }
    }
}
