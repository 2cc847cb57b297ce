mod engine;
mod modnet;
mod preprocess;
pub mod types;

pub use engine::{composite, MattingEngine};
pub use modnet::ModnetMatting;
pub use preprocess::Preprocessor;
pub use types::{AlphaMatte, MattingModel};

use std::sync::Arc;

/// Load the default matting model (MODNet) from an ONNX file
pub fn create_default_model(
    model_path: &str,
    intra_threads: usize,
) -> anyhow::Result<Arc<dyn MattingModel>> {
    let model = ModnetMatting::new(model_path, intra_threads)?;
    Ok(Arc::new(model))
}
