//! Tunable settings for the normalization pipeline.
//!
//! Every constant the pipeline relies on (band width, uniformity threshold, blur
//! kernel, model grid multiple, inference timeout) lives here so it can be
//! overridden from a JSON file instead of being baked into the stages.

use crate::error::{PhotoError, Result as PhotoResult};
use crate::types::parse_hex_color;
use anyhow::{Context, Result};
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Canvas extension policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasSettings {
    /// Width in pixels of the perimeter band sampled for uniformity.
    pub band_width: u32,
    /// Per-channel standard deviation (0-255 units) below which the border is uniform.
    pub std_dev_threshold: f64,
    /// Side of the Gaussian kernel used to soften replicated margins (odd).
    pub blur_kernel: u32,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            band_width: 10,
            std_dev_threshold: 15.0,
            blur_kernel: 9,
        }
    }
}

/// Background matting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MattingSettings {
    /// Spatial multiple the matting network requires.
    pub size_multiple: u32,
    /// Upper bound on a single inference call.
    pub timeout_ms: u64,
    /// Colour used when no background is requested, and under transparent custom backgrounds.
    pub default_background: String,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for MattingSettings {
    fn default() -> Self {
        Self {
            size_multiple: 32,
            timeout_ms: 30_000,
            default_background: "#FFFFFF".to_string(),
            intra_threads: 4,
        }
    }
}

impl MattingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_background_color(&self) -> PhotoResult<Rgb<u8>> {
        parse_hex_color(&self.default_background)
    }
}

/// Face recentering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenteringSettings {
    /// Colour of the border exposed by the translation.
    pub fill_color: String,
}

impl Default for CenteringSettings {
    fn default() -> Self {
        Self {
            fill_color: "#FFFFFF".to_string(),
        }
    }
}

/// YuNet detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Faces scoring below this are ignored.
    pub score_threshold: f32,
    /// IoU above which a weaker face is suppressed.
    pub nms_threshold: f32,
    /// Candidates kept before suppression; 0 keeps all.
    pub top_k: usize,
    pub input_width: u32,
    pub input_height: u32,
    /// Eye box side as a fraction of the face width.
    pub eye_box_scale: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.9,
            nms_threshold: 0.3,
            top_k: 5_000,
            input_width: 640,
            input_height: 640,
            eye_box_scale: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// JPEG quality (1-100) for opaque results.
    pub jpeg_quality: u8,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { jpeg_quality: 95 }
    }
}

/// Settings consumed by [`crate::pipeline::PhotoNormalizer`] and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NormalizerSettings {
    /// MODNet-style matting model (ONNX).
    pub matting_model_path: Option<String>,
    /// YuNet face detector model (ONNX).
    pub face_model_path: Option<String>,
    /// Replacement country/template dimension tables (JSON).
    pub dimensions_path: Option<String>,
    pub canvas: CanvasSettings,
    pub matting: MattingSettings,
    pub centering: CenteringSettings,
    pub detection: DetectionSettings,
    pub output: OutputSettings,
}

impl NormalizerSettings {
    /// Load settings from a JSON file; missing fields keep their defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: NormalizerSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Reject values the stages cannot work with.
    pub fn validate(&self) -> PhotoResult<()> {
        let invalid = |msg: String| Err(PhotoError::InvalidParameters(msg));
        if self.canvas.band_width == 0 {
            return invalid("canvas.band_width must be positive".into());
        }
        if self.canvas.std_dev_threshold.is_nan() || self.canvas.std_dev_threshold <= 0.0 {
            return invalid("canvas.std_dev_threshold must be positive".into());
        }
        if self.canvas.blur_kernel == 0 || self.canvas.blur_kernel % 2 == 0 {
            return invalid(format!(
                "canvas.blur_kernel must be odd, got {}",
                self.canvas.blur_kernel
            ));
        }
        if self.matting.size_multiple == 0 {
            return invalid("matting.size_multiple must be positive".into());
        }
        if self.matting.timeout_ms == 0 {
            return invalid("matting.timeout_ms must be positive".into());
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return invalid(format!(
                "output.jpeg_quality must be 1-100, got {}",
                self.output.jpeg_quality
            ));
        }
        self.matting.default_background_color()?;
        self.centering_fill()?;
        Ok(())
    }

    pub fn centering_fill(&self) -> PhotoResult<Rgb<u8>> {
        parse_hex_color(&self.centering.fill_color)
    }
}
