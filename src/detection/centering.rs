//! Translate a portrait so the midpoint between the eyes sits at the image centre.

use super::ObjectDetector;
use crate::error::{PhotoError, Result};
use crate::imaging::ImageOps;
use crate::types::{PixelBuffer, Point, Rect};
use image::Rgb;
use std::sync::Arc;

/// Eye centres in full-image coordinates, `left.x <= right.x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeCenters {
    pub left: Point,
    pub right: Point,
}

impl EyeCenters {
    /// Order two points left-to-right by x.
    pub fn new(a: Point, b: Point) -> Self {
        if b.x < a.x {
            Self { left: b, right: a }
        } else {
            Self { left: a, right: b }
        }
    }

    pub fn midpoint(&self) -> Point {
        self.left.midpoint(&self.right)
    }
}

/// Result of a centering pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CenteringOutcome {
    pub image: PixelBuffer,
    pub eyes: EyeCenters,
    /// Applied translation `(dx, dy)` in pixels.
    pub shift: (f64, f64),
}

#[derive(Clone)]
pub struct FaceCenteringTransform {
    ops: Arc<dyn ImageOps>,
    fill: Rgb<u8>,
}

impl FaceCenteringTransform {
    pub fn new(ops: Arc<dyn ImageOps>, fill: Rgb<u8>) -> Self {
        Self { ops, fill }
    }

    /// Find the eyes of the first detected face.
    ///
    /// The eye detector runs on the face crop only; its boxes are mapped back
    /// to full-image coordinates.
    pub fn locate_eyes(
        &self,
        image: &PixelBuffer,
        face_detector: &dyn ObjectDetector,
        eye_detector: &dyn ObjectDetector,
    ) -> Result<EyeCenters> {
        let _span = tracing::debug_span!("locate_eyes").entered();

        let size = image.size()?;
        let faces = face_detector.detect(image)?;
        let face = faces
            .first()
            .and_then(|f| f.clamp_to(size))
            .ok_or(PhotoError::NoFaceDetected)?;
        tracing::debug!("Using face {:?} of {} detected", face, faces.len());

        let roi = image.crop(face)?;
        let eyes = eye_detector.detect(&roi)?;
        if eyes.len() < 2 {
            return Err(PhotoError::InsufficientEyesDetected { found: eyes.len() });
        }

        let to_image = |eye: &Rect| Point {
            x: face.x as f64 + eye.x as f64 + eye.width as f64 / 2.0,
            y: face.y as f64 + eye.y as f64 + eye.height as f64 / 2.0,
        };
        Ok(EyeCenters::new(to_image(&eyes[0]), to_image(&eyes[1])))
    }

    pub fn center_on_eyes(
        &self,
        image: &PixelBuffer,
        face_detector: &dyn ObjectDetector,
        eye_detector: &dyn ObjectDetector,
    ) -> Result<PixelBuffer> {
        self.center_with_report(image, face_detector, eye_detector)
            .map(|outcome| outcome.image)
    }

    /// Shift the image so the eye midpoint lands on `(W/2, H/2)`.
    ///
    /// Dimensions are unchanged; exposed pixels take the fill colour.
    pub fn center_with_report(
        &self,
        image: &PixelBuffer,
        face_detector: &dyn ObjectDetector,
        eye_detector: &dyn ObjectDetector,
    ) -> Result<CenteringOutcome> {
        let _span = tracing::debug_span!("center_on_eyes").entered();

        let eyes = self.locate_eyes(image, face_detector, eye_detector)?;
        let mid = eyes.midpoint();
        let dx = image.width() as f64 / 2.0 - mid.x;
        let dy = image.height() as f64 / 2.0 - mid.y;
        tracing::debug!(
            "Eyes at ({:.1}, {:.1}) / ({:.1}, {:.1}), shifting by ({:.1}, {:.1})",
            eyes.left.x,
            eyes.left.y,
            eyes.right.x,
            eyes.right.y,
            dx,
            dy
        );

        let shifted = self.ops.translate(image, dx, dy, self.fill)?;
        Ok(CenteringOutcome {
            image: shifted,
            eyes,
            shift: (dx, dy),
        })
    }
}
