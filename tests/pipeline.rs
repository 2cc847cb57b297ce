use idphoto_fx::canvas::MarginFill;
use idphoto_fx::{
    BackgroundSpec, ImageOps, MattingModel, NormalizerSettings, ObjectDetector, PhotoError,
    PhotoNormalizer, PixelBuffer, RasterOps, Rect, ResizeStrategy, Size, SizeRequest,
};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::Array4;
use std::sync::Arc;

/// Returns a constant matte of the right size.
struct ConstantMatte(f32);

impl MattingModel for ConstantMatte {
    fn infer(&self, input: &Array4<f32>) -> idphoto_fx::Result<Vec<f32>> {
        let (_, _, h, w) = input.dim();
        Ok(vec![self.0; h * w])
    }
}

/// Alternates values well outside [0, 1].
struct WildMatte;

impl MattingModel for WildMatte {
    fn infer(&self, input: &Array4<f32>) -> idphoto_fx::Result<Vec<f32>> {
        let (_, _, h, w) = input.dim();
        Ok((0..h * w).map(|i| if i % 2 == 0 { -3.0 } else { 4.0 }).collect())
    }
}

/// Returns one element too few.
struct TruncatedMatte;

impl MattingModel for TruncatedMatte {
    fn infer(&self, input: &Array4<f32>) -> idphoto_fx::Result<Vec<f32>> {
        let (_, _, h, w) = input.dim();
        Ok(vec![1.0; h * w - 1])
    }
}

struct FixedBoxes(Vec<Rect>);

impl ObjectDetector for FixedBoxes {
    fn detect(&self, _image: &PixelBuffer) -> idphoto_fx::Result<Vec<Rect>> {
        Ok(self.0.clone())
    }
}

fn normalizer(
    model: impl MattingModel + 'static,
    faces: Vec<Rect>,
    eyes: Vec<Rect>,
) -> PhotoNormalizer {
    PhotoNormalizer::new(
        Arc::new(RasterOps::new()),
        Arc::new(model),
        Arc::new(FixedBoxes(faces)),
        Arc::new(FixedBoxes(eyes)),
        NormalizerSettings::default(),
    )
    .expect("default settings are valid")
}

fn portrait(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::Rgb(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 3 + y) % 256) as u8])
    }))
}

fn default_face() -> Vec<Rect> {
    vec![Rect::new(100, 150, 200, 200)]
}

fn default_eyes() -> Vec<Rect> {
    vec![Rect::new(40, 60, 30, 20), Rect::new(130, 64, 30, 20)]
}

#[test]
fn landscape_photo_fits_singapore_canvas() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let image = portrait(800, 600);

    let canvas = n
        .resize_to_canvas(&image, &SizeRequest::country("SG"))
        .unwrap();
    assert_eq!(canvas.dimensions(), (400, 514));

    // Content is the 400x300 fit, pasted pixel-exact at y = 107.
    let fitted = ResizeStrategy::new(Arc::new(RasterOps::new()))
        .fit(&image, Size::new(400, 514).unwrap())
        .unwrap();
    assert_eq!(fitted.dimensions(), (400, 300));
    let PixelBuffer::Rgb(canvas) = canvas else {
        panic!("opaque input must stay opaque");
    };
    let PixelBuffer::Rgb(fitted) = fitted else {
        panic!("opaque input must stay opaque");
    };
    for y in 0..300 {
        for x in 0..400 {
            assert_eq!(canvas.get_pixel(x, y + 107), fitted.get_pixel(x, y));
        }
    }
}

#[test]
fn transparent_input_gets_transparent_margins() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let image = PixelBuffer::Rgba(RgbaImage::from_pixel(200, 100, Rgba([50, 60, 70, 255])));
    let canvas = n
        .resize_to_canvas(&image, &SizeRequest::custom(200, 300))
        .unwrap();
    let PixelBuffer::Rgba(canvas) = canvas else {
        panic!("alpha must be preserved");
    };
    assert_eq!(*canvas.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
    assert_eq!(*canvas.get_pixel(100, 150), Rgba([50, 60, 70, 255]));
}

#[test]
fn missing_size_source_is_invalid_parameters() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let err = n
        .resize_to_canvas(&portrait(10, 10), &SizeRequest::default())
        .unwrap_err();
    assert!(matches!(err, PhotoError::InvalidParameters(_)));
    assert!(err.is_user_correctable());
}

#[test]
fn no_face_aborts_normalization() {
    let n = normalizer(ConstantMatte(1.0), vec![], default_eyes());
    let err = n
        .normalize(&portrait(800, 600), &SizeRequest::country("sg"), &BackgroundSpec::default())
        .unwrap_err();
    assert!(matches!(err, PhotoError::NoFaceDetected));
}

#[test]
fn malformed_matte_is_an_inference_error() {
    let n = normalizer(TruncatedMatte, default_face(), default_eyes());
    let err = n
        .remove_background(&portrait(64, 64), &BackgroundSpec::default())
        .unwrap_err();
    assert!(matches!(err, PhotoError::Inference(_)));
    assert!(!err.is_user_correctable());
}

#[test]
fn full_foreground_on_white_is_unchanged() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    // Neither size is a multiple of the network stride.
    for (w, h) in [(70, 50), (400, 514)] {
        let image = portrait(w, h);
        let out = n
            .remove_background(&image, &BackgroundSpec::from_hex("#FFFFFF").unwrap())
            .unwrap();
        assert_eq!(out, image, "{w}x{h}");
    }
}

#[test]
fn matting_output_is_opaque_and_same_size() {
    let n = normalizer(WildMatte, default_face(), default_eyes());
    let image = PixelBuffer::Rgba(RgbaImage::from_pixel(75, 101, Rgba([10, 20, 30, 128])));
    let out = n
        .remove_background(&image, &BackgroundSpec::Solid(Rgb([0, 0, 0])))
        .unwrap();
    assert!(!out.has_alpha());
    assert_eq!(out.dimensions(), (75, 101));
}

#[test]
fn image_background_is_fitted_behind_subject() {
    let n = normalizer(ConstantMatte(0.0), default_face(), default_eyes());
    let backdrop = PixelBuffer::Rgb(RgbImage::from_pixel(10, 10, Rgb([0, 128, 0])));
    let out = n
        .remove_background(&portrait(64, 64), &BackgroundSpec::Image(backdrop))
        .unwrap();
    let PixelBuffer::Rgb(out) = out else {
        panic!("matting output must be RGB");
    };
    assert!(out.pixels().all(|p| *p == Rgb([0, 128, 0])));
}

#[test]
fn eye_detection_order_does_not_matter() {
    let image = portrait(400, 514);
    let mut reversed = default_eyes();
    reversed.reverse();

    let forward = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let backward = normalizer(ConstantMatte(1.0), default_face(), reversed);
    assert_eq!(
        forward.center(&image).unwrap(),
        backward.center(&image).unwrap()
    );
}

#[test]
fn normalize_reports_target_and_eyes() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let photo = n
        .normalize(&portrait(800, 600), &SizeRequest::template("Singapore"), &BackgroundSpec::default())
        .unwrap();
    assert_eq!(photo.target, Size::new(400, 514).unwrap());
    assert_eq!(photo.image.dimensions(), (400, 514));
    assert!(!photo.image.has_alpha());
    assert_eq!(photo.margin, MarginFill::Replicated);
    assert!(photo.eyes.left.x <= photo.eyes.right.x);

    let mid_x = (photo.eyes.left.x + photo.eyes.right.x) / 2.0;
    assert!((mid_x + photo.shift.0 - 200.0).abs() < 1e-9);
}

#[test]
fn batch_aborts_on_first_failure() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let images = vec![portrait(800, 600), PixelBuffer::Rgb(RgbImage::new(0, 0))];
    let err = n
        .normalize_batch(&images, &SizeRequest::country("sg"), &BackgroundSpec::default())
        .unwrap_err();
    assert!(matches!(err, PhotoError::InvalidImageFormat(_)));

    let ok = n
        .normalize_batch(&images[..1], &SizeRequest::country("sg"), &BackgroundSpec::default())
        .unwrap();
    assert_eq!(ok.len(), 1);
}

#[test]
fn crop_validates_rectangle() {
    let n = normalizer(ConstantMatte(1.0), default_face(), default_eyes());
    let image = portrait(100, 80);
    assert_eq!(
        n.crop(&image, Rect::new(10, 10, 50, 40)).unwrap().dimensions(),
        (50, 40)
    );
    assert!(matches!(
        n.crop(&image, Rect::new(60, 10, 50, 40)),
        Err(PhotoError::InvalidParameters(_))
    ));
}

#[test]
fn ops_are_usable_as_trait_objects() {
    let ops: Arc<dyn ImageOps> = Arc::new(RasterOps::new());
    let shifted = ops
        .translate(&portrait(20, 20), -5.0, 0.0, Rgb([255, 255, 255]))
        .unwrap();
    let PixelBuffer::Rgb(shifted) = shifted else {
        panic!("layout changed");
    };
    assert_eq!(*shifted.get_pixel(19, 0), Rgb([255, 255, 255]));
}
