use super::ObjectDetector;
use crate::canvas::centered_rect;
use crate::config::DetectionSettings;
use crate::error::{PhotoError, Result};
use crate::imaging::{ImageOps, Interpolation};
use crate::types::{PixelBuffer, Rect, Size};
use anyhow::Context;
use image::{imageops, Rgb, RgbImage};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::{Arc, Mutex};

const OUTPUT_COLS: usize = 15; // bbox (4) + landmarks (10) + score (1)
const STRIDES: [usize; 3] = [8, 16, 32];
const OUTPUTS_PER_STRIDE: usize = 4; // cls, obj, bbox, kps

/// Margin around a face crop, per side, as a fraction of its longer side.
const EYE_PASS_CONTEXT: f32 = 0.5;
const CONTEXT_FILL: Rgb<u8> = Rgb([128, 128, 128]);

/// Sub-pixel box, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    fn right(&self) -> f32 {
        self.x + self.width
    }

    fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Overlap ratio; 0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &Self) -> f32 {
        let overlap_w = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let overlap_h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let overlap = overlap_w * overlap_h;
        let union = self.area() + other.area() - overlap;
        if overlap > 0.0 && union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }

    /// Smallest pixel rectangle covering the box, clipped to `bounds`.
    pub fn to_rect(&self, bounds: Size) -> Option<Rect> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = self.right().ceil().min(bounds.width as f32);
        let y1 = self.bottom().ceil().min(bounds.height as f32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// One YuNet face.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Right eye, left eye, nose tip, right mouth corner, left mouth corner.
    pub landmarks: [Landmark; 5],
    pub score: f32,
}

impl Detection {
    /// Parse one output row into source coordinates.
    ///
    /// `None` when the score is below `min_score` (or not finite) or the box is empty.
    fn from_row(row: &[f32], (sx, sy): (f32, f32), min_score: f32) -> Option<Self> {
        let score = row[14];
        if !score.is_finite() || score < min_score {
            return None;
        }
        let bbox = BoundingBox {
            x: row[0] * sx,
            y: row[1] * sy,
            width: row[2] * sx,
            height: row[3] * sy,
        };
        if bbox.area() <= 0.0 {
            return None;
        }
        let landmarks = std::array::from_fn(|i| Landmark {
            x: row[4 + 2 * i] * sx,
            y: row[5 + 2 * i] * sy,
        });
        Some(Self {
            bbox,
            landmarks,
            score,
        })
    }

    /// Same face with every coordinate shifted by `(dx, dy)`.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            bbox: BoundingBox {
                x: self.bbox.x + dx,
                y: self.bbox.y + dy,
                ..self.bbox
            },
            landmarks: self.landmarks.map(|lm| Landmark {
                x: lm.x + dx,
                y: lm.y + dy,
            }),
            score: self.score,
        }
    }
}

/// Turn `[N, 15]` output rows into faces in source coordinates, strongest first.
///
/// `scale` maps network input coordinates to the source image. Rows below the
/// score threshold are dropped, the rest are cut to `top_k` and then greedily
/// suppressed against stronger faces overlapping by more than `nms_threshold`.
pub fn postprocess(
    rows: &[f32],
    scale: (f32, f32),
    settings: &DetectionSettings,
) -> Result<Vec<Detection>> {
    if rows.len() % OUTPUT_COLS != 0 {
        return Err(PhotoError::Inference(format!(
            "YuNet output length {} is not a multiple of {OUTPUT_COLS}",
            rows.len()
        )));
    }

    let mut candidates: Vec<Detection> = rows
        .chunks_exact(OUTPUT_COLS)
        .filter_map(|row| Detection::from_row(row, scale, settings.score_threshold))
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    if settings.top_k > 0 {
        candidates.truncate(settings.top_k);
    }
    if settings.nms_threshold <= 0.0 {
        return Ok(candidates);
    }

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > settings.nms_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    Ok(kept)
}

/// Fuse the twelve per-stride heads (cls ×3, obj ×3, bbox ×3, kps ×3) into `[N, 15]` rows.
pub fn decode_fused_outputs(outputs: &[Vec<f32>], input: Size) -> Result<Vec<f32>> {
    let expected = STRIDES.len() * OUTPUTS_PER_STRIDE;
    if outputs.len() != expected {
        return Err(PhotoError::Inference(format!(
            "YuNet decode expects {expected} tensors, got {}",
            outputs.len()
        )));
    }

    let pad_w = align_to(input.width as usize, 32);
    let pad_h = align_to(input.height as usize, 32);
    let mut fused = Vec::new();

    for (i, &stride) in STRIDES.iter().enumerate() {
        let cols = pad_w / stride;
        let rows = pad_h / stride;
        let cells = rows * cols;

        let cls = &outputs[i];
        let obj = &outputs[i + STRIDES.len()];
        let bbox = &outputs[i + STRIDES.len() * 2];
        let kps = &outputs[i + STRIDES.len() * 3];
        if cls.len() != cells || obj.len() != cells || bbox.len() != cells * 4 || kps.len() != cells * 10
        {
            return Err(PhotoError::Inference(format!(
                "YuNet stride {stride} head sizes do not match a {cols}x{rows} grid"
            )));
        }

        let s = stride as f32;
        fused.reserve(cells * OUTPUT_COLS);
        for row in 0..rows {
            for col in 0..cols {
                let idx = row * cols + col;
                let mut score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
                if !score.is_finite() {
                    score = 0.0;
                }

                let b = &bbox[idx * 4..idx * 4 + 4];
                let cx = (col as f32 + b[0]) * s;
                let cy = (row as f32 + b[1]) * s;
                let w = b[2].exp() * s;
                let h = b[3].exp() * s;
                fused.extend_from_slice(&[cx - w / 2.0, cy - h / 2.0, w, h]);

                let k = &kps[idx * 10..idx * 10 + 10];
                for lm in 0..5 {
                    fused.push((k[lm * 2] + col as f32) * s);
                    fused.push((k[lm * 2 + 1] + row as f32) * s);
                }
                fused.push(score);
            }
        }
    }

    Ok(fused)
}

fn align_to(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor) * divisor
}

/// YuNet face detector session (ONNX).
pub struct YuNetModel {
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>,
    input_size: Size,
    ops: Arc<dyn ImageOps>,
    settings: DetectionSettings,
}

impl YuNetModel {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        settings: &DetectionSettings,
        ops: Arc<dyn ImageOps>,
    ) -> anyhow::Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading YuNet model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "input".to_string());
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let input_size = Size::new(
            align_to(settings.input_width as usize, 32) as u32,
            align_to(settings.input_height as usize, 32) as u32,
        )
        .context("YuNet input size must be positive")?;

        tracing::info!(
            "YuNet loaded, input '{}' at {}, {} output(s)",
            input_name,
            input_size,
            output_names.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_names,
            input_size,
            ops,
            settings: settings.clone(),
        })
    }

    /// Detect faces with landmarks, most confident first.
    pub fn detect_faces(&self, image: &PixelBuffer) -> Result<Vec<Detection>> {
        let _span = tracing::debug_span!("yunet_detect").entered();

        let source = image.size()?;
        let input = self.preprocess(image)?;
        let outputs = self.run(input)?;

        let rows = match outputs.len() {
            1 => outputs.into_iter().next().unwrap_or_default(),
            _ => decode_fused_outputs(&outputs, self.input_size)?,
        };

        let scale = (
            source.width as f32 / self.input_size.width as f32,
            source.height as f32 / self.input_size.height as f32,
        );
        let detections = postprocess(&rows, scale, &self.settings)?;
        tracing::debug!("YuNet found {} face(s)", detections.len());
        Ok(detections)
    }

    /// BGR, channel-first, raw 0-255 values, stretched to the input size.
    fn preprocess(&self, image: &PixelBuffer) -> Result<Tensor<f32>> {
        let source = image.size()?;
        let resized = self
            .ops
            .resize(image, self.input_size, Interpolation::for_scale(source, self.input_size))?
            .to_rgb();

        let (w, h) = (self.input_size.width as usize, self.input_size.height as usize);
        let plane = w * h;
        let mut data = vec![0f32; 3 * plane];
        for (x, y, px) in resized.enumerate_pixels() {
            let idx = y as usize * w + x as usize;
            data[idx] = px[2] as f32;
            data[plane + idx] = px[1] as f32;
            data[2 * plane + idx] = px[0] as f32;
        }

        Tensor::from_array(([1usize, 3, h, w], data)).map_err(PhotoError::inference)
    }

    fn run(&self, input: Tensor<f32>) -> Result<Vec<Vec<f32>>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| PhotoError::Inference("YuNet session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(PhotoError::inference)?;

        // Heads are read in graph order: cls, obj, bbox, kps per stride.
        let mut heads = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (_, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(PhotoError::inference)?;
            heads.push(data.to_vec());
        }
        Ok(heads)
    }
}

/// Face boxes from YuNet.
#[derive(Clone)]
pub struct YuNetFaceDetector {
    model: Arc<YuNetModel>,
}

impl YuNetFaceDetector {
    pub fn new(model: Arc<YuNetModel>) -> Self {
        Self { model }
    }
}

impl ObjectDetector for YuNetFaceDetector {
    fn detect(&self, image: &PixelBuffer) -> Result<Vec<Rect>> {
        let bounds = image.size()?;
        Ok(self
            .model
            .detect_faces(image)?
            .iter()
            .filter_map(|d| d.bbox.to_rect(bounds))
            .collect())
    }
}

/// Eye boxes from a second YuNet pass over a face crop.
///
/// A tight face crop is closer than the faces YuNet is trained on, so the crop
/// is centred on a square grey canvas with [`EYE_PASS_CONTEXT`] of its longer
/// side on every side before detection. Landmarks are mapped back to crop
/// coordinates. If the padded crop still yields no face, no eyes are returned.
#[derive(Clone)]
pub struct YuNetEyeDetector {
    model: Arc<YuNetModel>,
    eye_box_scale: f32,
}

impl YuNetEyeDetector {
    pub fn new(model: Arc<YuNetModel>, eye_box_scale: f32) -> Self {
        Self {
            model,
            eye_box_scale,
        }
    }

    /// Squares centred on the two eye landmarks, side `face width * eye_box_scale`.
    pub fn eye_boxes(detection: &Detection, eye_box_scale: f32, bounds: Size) -> Vec<Rect> {
        let side = (detection.bbox.width * eye_box_scale).max(2.0);
        detection.landmarks[..2]
            .iter()
            .filter_map(|eye| {
                BoundingBox {
                    x: eye.x - side / 2.0,
                    y: eye.y - side / 2.0,
                    width: side,
                    height: side,
                }
                .to_rect(bounds)
            })
            .collect()
    }
}

/// Centre `image` on a square grey canvas padded by `context` of its longer side.
///
/// Returns the canvas and where the image's top-left corner landed on it.
pub fn with_context(image: &PixelBuffer, context: f32) -> Result<(PixelBuffer, (u32, u32))> {
    let size = image.size()?;
    let longer = size.width.max(size.height) as f32;
    let side = (longer * (1.0 + 2.0 * context.max(0.0))).round() as u32;
    let canvas_size = Size::new(side, side)?;
    let roi = centered_rect(size, canvas_size);

    let mut canvas = RgbImage::from_pixel(side, side, CONTEXT_FILL);
    imageops::replace(
        &mut canvas,
        &image.flatten_onto(CONTEXT_FILL),
        roi.x as i64,
        roi.y as i64,
    );
    Ok((PixelBuffer::Rgb(canvas), (roi.x, roi.y)))
}

impl ObjectDetector for YuNetEyeDetector {
    fn detect(&self, image: &PixelBuffer) -> Result<Vec<Rect>> {
        let bounds = image.size()?;
        let (padded, (ox, oy)) = with_context(image, EYE_PASS_CONTEXT)?;
        let faces = self.model.detect_faces(&padded)?;
        tracing::debug!("Eye pass found {} face(s) in {} crop", faces.len(), bounds);

        Ok(faces
            .first()
            .map(|face| {
                let face = face.translated(-(ox as f32), -(oy as f32));
                Self::eye_boxes(&face, self.eye_box_scale, bounds)
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bbox: [f32; 4], score: f32) -> [f32; OUTPUT_COLS] {
        let mut r = [0f32; OUTPUT_COLS];
        r[..4].copy_from_slice(&bbox);
        for (i, v) in r[4..14].iter_mut().enumerate() {
            *v = i as f32;
        }
        r[14] = score;
        r
    }

    fn flatten(rows: &[[f32; OUTPUT_COLS]]) -> Vec<f32> {
        rows.iter().flatten().copied().collect()
    }

    #[test]
    fn filters_by_score_and_scales_coordinates() {
        let rows = flatten(&[row([10.0, 20.0, 30.0, 40.0], 0.95), row([0.0, 0.0, 5.0, 5.0], 0.5)]);
        let detections = postprocess(&rows, (2.0, 0.5), &DetectionSettings::default()).unwrap();
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(
            d.bbox,
            BoundingBox {
                x: 20.0,
                y: 10.0,
                width: 60.0,
                height: 20.0
            }
        );
        assert_eq!(d.landmarks[1], Landmark { x: 4.0, y: 1.5 });
    }

    #[test]
    fn applies_non_max_suppression() {
        let rows = flatten(&[
            row([0.0, 0.0, 100.0, 100.0], 0.92),
            row([5.0, 5.0, 100.0, 100.0], 0.97),
            row([300.0, 300.0, 50.0, 50.0], 0.91),
        ]);
        let detections = postprocess(&rows, (1.0, 1.0), &DetectionSettings::default()).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].score, 0.97);
        assert_eq!(detections[1].bbox.x, 300.0);
    }

    #[test]
    fn ragged_output_is_rejected() {
        let err = postprocess(&[0.0; 16], (1.0, 1.0), &DetectionSettings::default()).unwrap_err();
        assert!(matches!(err, PhotoError::Inference(_)));
    }

    #[test]
    fn decodes_fused_heads() {
        let input = Size::new(32, 32).unwrap();
        // Grids: 4x4, 2x2, 1x1.
        let cells = [16usize, 4, 1];
        let mut outputs: Vec<Vec<f32>> = Vec::new();
        for &n in &cells {
            outputs.push(vec![0.0; n]); // cls
        }
        for &n in &cells {
            outputs.push(vec![0.0; n]); // obj
        }
        for &n in &cells {
            outputs.push(vec![0.0; n * 4]); // bbox
        }
        for &n in &cells {
            outputs.push(vec![0.0; n * 10]); // kps
        }
        // Stride 16, cell (col 1, row 0).
        outputs[1][1] = 1.0;
        outputs[4][1] = 1.0;
        outputs[7][4..8].copy_from_slice(&[0.5, 0.5, 0.0, 0.0]);

        let fused = decode_fused_outputs(&outputs, input).unwrap();
        assert_eq!(fused.len(), 21 * OUTPUT_COLS);

        let r = &fused[(16 + 1) * OUTPUT_COLS..(16 + 2) * OUTPUT_COLS];
        assert_eq!(&r[..4], &[16.0, 0.0, 16.0, 16.0]);
        assert_eq!(r[4], 16.0);
        assert_eq!(r[14], 1.0);
        assert_eq!(fused[14], 0.0);
    }

    #[test]
    fn wrong_head_count_is_rejected() {
        let input = Size::new(32, 32).unwrap();
        assert!(decode_fused_outputs(&[vec![0.0; 3]], input).is_err());
    }

    #[test]
    fn eye_boxes_surround_landmarks() {
        let mut landmarks = [Landmark { x: 0.0, y: 0.0 }; 5];
        landmarks[0] = Landmark { x: 30.0, y: 40.0 };
        landmarks[1] = Landmark { x: 70.0, y: 40.0 };
        let detection = Detection {
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 80.0,
                height: 100.0,
            },
            landmarks,
            score: 0.99,
        };
        let boxes = YuNetEyeDetector::eye_boxes(&detection, 0.25, Size::new(100, 120).unwrap());
        assert_eq!(boxes, vec![Rect::new(20, 30, 20, 20), Rect::new(60, 30, 20, 20)]);
    }

    #[test]
    fn face_crop_is_padded_square_and_centred() {
        let crop = PixelBuffer::Rgb(RgbImage::from_pixel(40, 20, Rgb([200, 10, 10])));
        let (padded, offset) = with_context(&crop, 0.5).unwrap();
        assert_eq!(padded.dimensions(), (80, 80));
        assert_eq!(offset, (20, 30));
        let PixelBuffer::Rgb(padded) = padded else {
            panic!("context canvas must be RGB");
        };
        assert_eq!(*padded.get_pixel(20, 30), Rgb([200, 10, 10]));
        assert_eq!(*padded.get_pixel(59, 49), Rgb([200, 10, 10]));
        assert_eq!(*padded.get_pixel(19, 30), CONTEXT_FILL);
    }

    #[test]
    fn landmarks_map_back_from_padded_canvas() {
        let mut landmarks = [Landmark { x: 0.0, y: 0.0 }; 5];
        landmarks[0] = Landmark { x: 50.0, y: 60.0 };
        landmarks[1] = Landmark { x: 90.0, y: 60.0 };
        let on_canvas = Detection {
            bbox: BoundingBox {
                x: 30.0,
                y: 30.0,
                width: 80.0,
                height: 100.0,
            },
            landmarks,
            score: 0.95,
        };
        let face = on_canvas.translated(-20.0, -20.0);
        assert_eq!(face.bbox.x, 10.0);
        assert_eq!(face.landmarks[1], Landmark { x: 70.0, y: 40.0 });
        let boxes = YuNetEyeDetector::eye_boxes(&face, 0.25, Size::new(100, 120).unwrap());
        assert_eq!(boxes, vec![Rect::new(20, 30, 20, 20), Rect::new(60, 30, 20, 20)]);
    }

    #[test]
    fn top_k_cuts_before_suppression() {
        let rows = flatten(&[
            row([0.0, 0.0, 10.0, 10.0], 0.99),
            row([50.0, 50.0, 10.0, 10.0], 0.98),
            row([90.0, 90.0, 10.0, 10.0], 0.97),
        ]);
        let settings = DetectionSettings {
            top_k: 2,
            ..DetectionSettings::default()
        };
        let detections = postprocess(&rows, (1.0, 1.0), &settings).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[1].score, 0.98);
    }

    #[test]
    fn boxes_are_clipped_to_bounds() {
        let b = BoundingBox {
            x: -5.5,
            y: 2.2,
            width: 20.0,
            height: 200.0,
        };
        assert_eq!(b.to_rect(Size::new(50, 50).unwrap()), Some(Rect::new(0, 2, 15, 48)));
        let outside = BoundingBox {
            x: 60.0,
            ..b
        };
        assert_eq!(outside.to_rect(Size::new(50, 50).unwrap()), None);
    }
}
