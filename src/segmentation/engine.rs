use super::preprocess::Preprocessor;
use super::types::{AlphaMatte, MattingModel};
use crate::canvas::CanvasCompositor;
use crate::config::{CanvasSettings, MattingSettings};
use crate::error::{PhotoError, Result};
use crate::imaging::{ImageOps, Interpolation};
use crate::resize::ResizeStrategy;
use crate::types::{BackgroundSpec, PixelBuffer, Size};
use image::{Rgb, RgbImage};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Replaces an image's background using a matting model.
#[derive(Clone)]
pub struct MattingEngine {
    ops: Arc<dyn ImageOps>,
    model: Arc<dyn MattingModel>,
    resize: ResizeStrategy,
    canvas: CanvasCompositor,
    size_multiple: u32,
    timeout: Duration,
    default_background: Rgb<u8>,
}

impl MattingEngine {
    pub fn new(
        ops: Arc<dyn ImageOps>,
        model: Arc<dyn MattingModel>,
        settings: &MattingSettings,
        canvas: &CanvasSettings,
    ) -> Result<Self> {
        Ok(Self {
            resize: ResizeStrategy::new(Arc::clone(&ops)),
            canvas: CanvasCompositor::new(Arc::clone(&ops), canvas),
            ops,
            model,
            size_multiple: settings.size_multiple,
            timeout: settings.timeout(),
            default_background: settings.default_background_color()?,
        })
    }

    /// Composite the subject over `background`.
    ///
    /// The result is opaque RGB with the input's dimensions. Alpha in the input
    /// is flattened over the default background colour before inference.
    pub fn remove_background(
        &self,
        image: &PixelBuffer,
        background: &BackgroundSpec,
    ) -> Result<PixelBuffer> {
        let _span = tracing::debug_span!("remove_background").entered();

        let original = image.size()?;
        let preprocessor = Preprocessor::new(self.size_multiple);
        let working = preprocessor.working_size(original);
        tracing::debug!("Matting {} at working size {}", original, working);

        let foreground = image.flatten_onto(self.default_background);
        let scaled = self
            .ops
            .resize(
                &PixelBuffer::Rgb(foreground.clone()),
                working,
                Interpolation::for_scale(original, working),
            )?
            .to_rgb();

        let tensor = preprocessor.preprocess(&scaled);
        let output = self.infer_with_timeout(tensor)?;
        let matte = Preprocessor::postprocess_matte(output, working)?;
        let matte = Preprocessor::resize_matte(matte, original)?;

        // Only the matte is resampled; foreground pixels are the input's own.
        let backdrop = self.backdrop(background, original)?;
        Ok(PixelBuffer::Rgb(composite(&foreground, &matte, &backdrop)))
    }

    fn backdrop(&self, background: &BackgroundSpec, size: Size) -> Result<RgbImage> {
        match background {
            BackgroundSpec::Solid(color) => Ok(RgbImage::from_pixel(size.width, size.height, *color)),
            BackgroundSpec::Image(image) => {
                let fitted = self.resize.fit(image, size)?;
                let placed = self.canvas.fit(&fitted, size)?;
                Ok(placed.flatten_onto(self.default_background))
            }
        }
    }

    fn infer_with_timeout(&self, tensor: ndarray::Array4<f32>) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("inference", model = self.model.name()).entered();

        let model = Arc::clone(&self.model);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("matting-inference".into())
            .spawn(move || {
                // The receiver is gone if the call already timed out.
                let _ = tx.send(model.infer(&tensor));
            })
            .map_err(PhotoError::inference)?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err @ PhotoError::Inference(_))) => Err(err),
            Ok(Err(other)) => Err(PhotoError::inference(other)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("Matting inference exceeded {:?}", self.timeout);
                Err(PhotoError::Inference(format!(
                    "inference timed out after {:?}",
                    self.timeout
                )))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PhotoError::Inference(
                "inference worker exited without a result".into(),
            )),
        }
    }
}

/// `out = fg * a + bg * (1 - a)` per channel, with `a` clamped to [0, 1].
pub fn composite(foreground: &RgbImage, matte: &AlphaMatte, background: &RgbImage) -> RgbImage {
    RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        let a = matte[[y as usize, x as usize]].clamp(0.0, 1.0);
        let fg = foreground.get_pixel(x, y);
        let bg = background.get_pixel(x, y);
        let mix = |f: u8, b: u8| (f as f32 * a + b as f32 * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
        Rgb([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RasterOps;
    use ndarray::Array4;

    struct ConstantMatte(f32);

    impl MattingModel for ConstantMatte {
        fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
            let (_, _, h, w) = input.dim();
            Ok(vec![self.0; h * w])
        }
    }

    struct Sleepy;

    impl MattingModel for Sleepy {
        fn infer(&self, _input: &Array4<f32>) -> Result<Vec<f32>> {
            thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }
    }

    fn engine(model: Arc<dyn MattingModel>, settings: MattingSettings) -> MattingEngine {
        MattingEngine::new(
            Arc::new(RasterOps::new()),
            model,
            &settings,
            &CanvasSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn zero_matte_yields_background() {
        let engine = engine(Arc::new(ConstantMatte(0.0)), MattingSettings::default());
        let image = PixelBuffer::Rgb(RgbImage::from_pixel(70, 50, Rgb([10, 200, 30])));
        let out = engine
            .remove_background(&image, &BackgroundSpec::Solid(Rgb([0, 0, 255])))
            .unwrap();
        assert_eq!(out.dimensions(), (70, 50));
        let PixelBuffer::Rgb(img) = out else {
            panic!("output must be opaque RGB");
        };
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 255])));
    }

    #[test]
    fn out_of_range_matte_is_clamped_at_blend() {
        let fg = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let bg = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let matte = AlphaMatte::from_elem((2, 2), 1.7);
        assert_eq!(composite(&fg, &matte, &bg), fg);
    }

    #[test]
    fn slow_model_times_out() {
        let settings = MattingSettings {
            timeout_ms: 20,
            ..MattingSettings::default()
        };
        let engine = engine(Arc::new(Sleepy), settings);
        let image = PixelBuffer::Rgb(RgbImage::new(32, 32));
        let err = engine
            .remove_background(&image, &BackgroundSpec::default())
            .unwrap_err();
        assert!(matches!(err, PhotoError::Inference(msg) if msg.contains("timed out")));
    }

    #[test]
    fn full_matte_on_white_keeps_odd_sized_input() {
        let engine = engine(Arc::new(ConstantMatte(1.0)), MattingSettings::default());
        let src = RgbImage::from_fn(70, 50, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, ((x + y) * 2) as u8]));
        let image = PixelBuffer::Rgb(src);
        let out = engine
            .remove_background(&image, &BackgroundSpec::Solid(Rgb([255, 255, 255])))
            .unwrap();
        assert_eq!(out, image);
    }
}
