//! Face and eye localisation.

pub mod centering;
mod yunet;

pub use centering::{CenteringOutcome, EyeCenters, FaceCenteringTransform};
pub use yunet::{
    decode_fused_outputs, postprocess, with_context, BoundingBox, Detection, Landmark,
    YuNetEyeDetector, YuNetFaceDetector, YuNetModel,
};

use crate::error::Result;
use crate::types::{PixelBuffer, Rect};

/// Finds objects (faces, eyes) in an image.
///
/// Returned boxes are in the coordinates of the image passed in, most
/// confident first.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &PixelBuffer) -> Result<Vec<Rect>>;
}
