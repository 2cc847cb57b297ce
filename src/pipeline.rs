//! The full ID-photo normalization flow and its individual steps.

use crate::canvas::{CanvasCompositor, MarginFill};
use crate::config::NormalizerSettings;
use crate::detection::{
    EyeCenters, FaceCenteringTransform, ObjectDetector, YuNetEyeDetector, YuNetFaceDetector,
    YuNetModel,
};
use crate::dimensions::{DimensionResolver, SizeRequest};
use crate::error::Result;
use crate::imaging::{ImageOps, RasterOps};
use crate::resize::ResizeStrategy;
use crate::segmentation::{self, MattingEngine, MattingModel};
use crate::types::{BackgroundSpec, PixelBuffer, Rect, Size};
use anyhow::Context;
use std::sync::Arc;

/// A normalized photo and how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPhoto {
    pub image: PixelBuffer,
    pub target: Size,
    pub margin: MarginFill,
    pub eyes: EyeCenters,
    /// Translation applied while centering.
    pub shift: (f64, f64),
}

/// Runs resize, canvas, centering and matting against shared models.
///
/// Built once and shared across request threads; requests do not share
/// mutable state.
#[derive(Clone)]
pub struct PhotoNormalizer {
    settings: NormalizerSettings,
    dimensions: DimensionResolver,
    resize: ResizeStrategy,
    canvas: CanvasCompositor,
    matting: MattingEngine,
    centering: FaceCenteringTransform,
    face_detector: Arc<dyn ObjectDetector>,
    eye_detector: Arc<dyn ObjectDetector>,
}

impl PhotoNormalizer {
    pub fn new(
        ops: Arc<dyn ImageOps>,
        matting_model: Arc<dyn MattingModel>,
        face_detector: Arc<dyn ObjectDetector>,
        eye_detector: Arc<dyn ObjectDetector>,
        settings: NormalizerSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            dimensions: DimensionResolver::default(),
            resize: ResizeStrategy::new(Arc::clone(&ops)),
            canvas: CanvasCompositor::new(Arc::clone(&ops), &settings.canvas),
            matting: MattingEngine::new(
                Arc::clone(&ops),
                matting_model,
                &settings.matting,
                &settings.canvas,
            )?,
            centering: FaceCenteringTransform::new(ops, settings.centering_fill()?),
            face_detector,
            eye_detector,
            settings,
        })
    }

    /// Load the ONNX models and dimension tables named in `settings`.
    pub fn from_settings(settings: NormalizerSettings) -> anyhow::Result<Self> {
        let ops: Arc<dyn ImageOps> = Arc::new(RasterOps::new());

        let matting_path = settings
            .matting_model_path
            .as_deref()
            .context("matting_model_path is not set")?;
        let face_path = settings
            .face_model_path
            .as_deref()
            .context("face_model_path is not set")?;

        let matting = segmentation::create_default_model(matting_path, settings.matting.intra_threads)
            .context("Failed to load matting model")?;
        let yunet = Arc::new(
            YuNetModel::new(face_path, &settings.detection, Arc::clone(&ops))
                .context("Failed to load face detector")?,
        );
        let faces = Arc::new(YuNetFaceDetector::new(Arc::clone(&yunet)));
        let eyes = Arc::new(YuNetEyeDetector::new(yunet, settings.detection.eye_box_scale));

        let dimensions = match settings.dimensions_path.as_deref() {
            Some(path) => Some(DimensionResolver::from_json_path(path)?),
            None => None,
        };

        let mut normalizer = Self::new(ops, matting, faces, eyes, settings)?;
        if let Some(dimensions) = dimensions {
            normalizer = normalizer.with_dimensions(dimensions);
        }
        Ok(normalizer)
    }

    pub fn with_dimensions(mut self, dimensions: DimensionResolver) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }

    pub fn dimensions(&self) -> &DimensionResolver {
        &self.dimensions
    }

    /// Fit into the requested size and extend to the exact canvas.
    pub fn resize_to_canvas(&self, image: &PixelBuffer, request: &SizeRequest) -> Result<PixelBuffer> {
        self.resize_with_report(image, request)
            .map(|(image, _, _)| image)
    }

    fn resize_with_report(
        &self,
        image: &PixelBuffer,
        request: &SizeRequest,
    ) -> Result<(PixelBuffer, Size, MarginFill)> {
        let _span = tracing::debug_span!("resize_to_canvas").entered();

        let target = self.dimensions.resolve_request(request)?;
        let fitted = self.resize.fit(image, target)?;
        let (canvas, margin) = self.canvas.fit_with_report(&fitted, target)?;
        tracing::debug!("Canvas {} filled as {:?}", target, margin);
        Ok((canvas, target, margin))
    }

    pub fn remove_background(
        &self,
        image: &PixelBuffer,
        background: &BackgroundSpec,
    ) -> Result<PixelBuffer> {
        self.matting.remove_background(image, background)
    }

    pub fn center(&self, image: &PixelBuffer) -> Result<PixelBuffer> {
        self.centering
            .center_on_eyes(image, self.face_detector.as_ref(), self.eye_detector.as_ref())
    }

    /// Cut out `rect`; it must be non-empty and inside the image.
    pub fn crop(&self, image: &PixelBuffer, rect: Rect) -> Result<PixelBuffer> {
        let _span = tracing::debug_span!("crop").entered();
        image.crop(rect)
    }

    /// Resize, center on the eyes, then replace the background.
    pub fn normalize(
        &self,
        image: &PixelBuffer,
        request: &SizeRequest,
        background: &BackgroundSpec,
    ) -> Result<NormalizedPhoto> {
        let _span = tracing::info_span!("normalize").entered();

        let (canvas, target, margin) = self.resize_with_report(image, request)?;

        // Centering fill and matting output are opaque.
        let canvas = if canvas.has_alpha() {
            PixelBuffer::Rgb(canvas.flatten_onto(self.settings.centering_fill()?))
        } else {
            canvas
        };

        let centered = self.centering.center_with_report(
            &canvas,
            self.face_detector.as_ref(),
            self.eye_detector.as_ref(),
        )?;
        let image = self.matting.remove_background(&centered.image, background)?;

        tracing::info!(
            "Normalized to {} (margin {:?}, shift {:.1},{:.1})",
            target,
            margin,
            centered.shift.0,
            centered.shift.1
        );

        Ok(NormalizedPhoto {
            image,
            target,
            margin,
            eyes: centered.eyes,
            shift: centered.shift,
        })
    }

    /// Normalize each image in order; the first failure aborts the batch.
    pub fn normalize_batch(
        &self,
        images: &[PixelBuffer],
        request: &SizeRequest,
        background: &BackgroundSpec,
    ) -> Result<Vec<NormalizedPhoto>> {
        let _span = tracing::info_span!("normalize_batch", count = images.len()).entered();

        images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                self.normalize(image, request, background).inspect_err(|err| {
                    tracing::warn!("Batch aborted at image {}: {}", index, err);
                })
            })
            .collect()
    }
}
