use crate::error::Result;
use ndarray::{Array2, Array4};

/// Alpha matte: foreground probability per pixel, shape `[height, width]`.
/// 0.0 = background, 1.0 = foreground. Lives for a single compositing call.
pub type AlphaMatte = Array2<f32>;

/// Trait for portrait matting models
/// Allows swapping the ONNX backend for another network, or a stub in tests
pub trait MattingModel: Send + Sync {
    /// Run the network on one frame
    ///
    /// # Arguments
    /// * `input` - NCHW tensor `[1, 3, H, W]`, RGB, values in [0, 1]
    ///
    /// # Returns
    /// * Flattened alpha values in row-major order; `H * W` elements expected
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>>;

    /// Short label for logs
    fn name(&self) -> &str {
        "matting"
    }
}
