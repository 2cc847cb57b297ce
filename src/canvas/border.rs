use crate::config::CanvasSettings;
use image::{Rgb, RgbImage};

/// Per-channel statistics of the perimeter band.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderStats {
    pub mean: [f64; 3],
    pub std_dev: [f64; 3],
    pub samples: usize,
    pub is_uniform: bool,
}

impl BorderStats {
    /// Mean colour rounded to the nearest 8-bit value.
    pub fn mean_color(&self) -> Rgb<u8> {
        Rgb(self.mean.map(|c| c.round().clamp(0.0, 255.0) as u8))
    }

    fn neutral() -> Self {
        Self {
            mean: [128.0; 3],
            std_dev: [0.0; 3],
            samples: 0,
            is_uniform: true,
        }
    }
}

/// Decides whether an image's border is flat enough to extend with a single colour.
#[derive(Debug, Clone)]
pub struct BorderUniformityAnalyzer {
    band_width: u32,
    threshold: f64,
}

impl Default for BorderUniformityAnalyzer {
    fn default() -> Self {
        Self::from_settings(&CanvasSettings::default())
    }
}

impl BorderUniformityAnalyzer {
    pub fn new(band_width: u32, threshold: f64) -> Self {
        Self {
            band_width,
            threshold,
        }
    }

    pub fn from_settings(settings: &CanvasSettings) -> Self {
        Self::new(settings.band_width, settings.std_dev_threshold)
    }

    /// Population mean and standard deviation over the band.
    ///
    /// The band is the top and bottom `b` rows plus the left and right `b`
    /// columns of the rows in between, so no pixel is counted twice. Images
    /// narrower or shorter than `2b` are reported uniform mid-grey.
    pub fn analyze(&self, image: &RgbImage) -> BorderStats {
        let _span = tracing::debug_span!("border_analyze").entered();

        let b = self.band_width;
        let (w, h) = image.dimensions();
        let span = b.saturating_mul(2);
        if b == 0 || w < span || h < span {
            tracing::debug!("Image {}x{} too small for a {}px band", w, h, b);
            return BorderStats::neutral();
        }

        let mut sum = [0f64; 3];
        let mut sum_sq = [0f64; 3];
        let mut samples = 0usize;
        let mut accumulate = |x: u32, y: u32| {
            let px = image.get_pixel(x, y);
            for c in 0..3 {
                let v = px[c] as f64;
                sum[c] += v;
                sum_sq[c] += v * v;
            }
            samples += 1;
        };

        for y in (0..b).chain(h - b..h) {
            for x in 0..w {
                accumulate(x, y);
            }
        }
        for y in b..h - b {
            for x in (0..b).chain(w - b..w) {
                accumulate(x, y);
            }
        }

        let n = samples as f64;
        let mean = sum.map(|s| s / n);
        let mut std_dev = [0f64; 3];
        for c in 0..3 {
            std_dev[c] = (sum_sq[c] / n - mean[c] * mean[c]).max(0.0).sqrt();
        }
        let is_uniform = std_dev.iter().all(|&sd| sd < self.threshold);

        tracing::debug!(
            "Border mean {:?} std {:?} over {} px, uniform={}",
            mean,
            std_dev,
            samples,
            is_uniform
        );

        BorderStats {
            mean,
            std_dev,
            samples,
            is_uniform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_border_is_uniform() {
        let mut image = RgbImage::from_pixel(60, 40, Rgb([200, 210, 220]));
        // Busy interior must not affect the result.
        for y in 15..25 {
            for x in 15..45 {
                image.put_pixel(x, y, Rgb([(x * 7) as u8, (y * 13) as u8, 0]));
            }
        }
        let stats = BorderUniformityAnalyzer::default().analyze(&image);
        assert!(stats.is_uniform);
        assert_eq!(stats.mean_color(), Rgb([200, 210, 220]));
        assert_eq!(stats.samples, (60 * 40 - 40 * 20) as usize);
    }

    #[test]
    fn huge_band_falls_back_to_neutral() {
        let image = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        let stats = BorderUniformityAnalyzer::new(u32::MAX, 15.0).analyze(&image);
        assert!(stats.is_uniform);
        assert_eq!(stats.mean_color(), Rgb([128, 128, 128]));
    }

    #[test]
    fn striped_border_is_not_uniform() {
        let image = RgbImage::from_fn(50, 50, |x, _| {
            if x % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let stats = BorderUniformityAnalyzer::default().analyze(&image);
        assert!(!stats.is_uniform);
    }

    #[test]
    fn tiny_image_reports_neutral_grey() {
        let image = RgbImage::from_pixel(15, 100, Rgb([0, 0, 0]));
        let stats = BorderUniformityAnalyzer::default().analyze(&image);
        assert!(stats.is_uniform);
        assert_eq!(stats.mean_color(), Rgb([128, 128, 128]));
    }

    #[test]
    fn analysis_is_deterministic() {
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([(x ^ y) as u8, (x * y) as u8, 7]));
        let analyzer = BorderUniformityAnalyzer::new(6, 15.0);
        assert_eq!(analyzer.analyze(&image), analyzer.analyze(&image));
    }
}
