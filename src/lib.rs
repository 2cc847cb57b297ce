//! ID photo normalization: fit to a country/template canvas, center on the
//! eyes, and replace the background with a portrait matting model.

pub mod canvas;
pub mod codec;
pub mod config;
pub mod detection;
pub mod dimensions;
pub mod error;
pub mod imaging;
pub mod pipeline;
pub mod resize;
pub mod segmentation;
pub mod types;

pub use canvas::{BorderStats, BorderUniformityAnalyzer, CanvasCompositor, MarginFill};
pub use config::NormalizerSettings;
pub use detection::{EyeCenters, FaceCenteringTransform, ObjectDetector};
pub use dimensions::{DimensionResolver, SizeRequest};
pub use error::{PhotoError, Result};
pub use imaging::{ImageOps, Interpolation, RasterOps};
pub use pipeline::{NormalizedPhoto, PhotoNormalizer};
pub use resize::ResizeStrategy;
pub use segmentation::{AlphaMatte, MattingEngine, MattingModel};
pub use types::{parse_hex_color, BackgroundSpec, PixelBuffer, Point, Rect, Size};
