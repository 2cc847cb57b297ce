use super::types::MattingModel;
use crate::error::{PhotoError, Result};
use anyhow::Context;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

/// MODNet portrait matting model
///
/// Stateless: each call is an independent image. Takes `[1, 3, H, W]` RGB in
/// [0, 1] with H and W multiples of 32, returns a `[1, 1, H, W]` alpha matte.
pub struct ModnetMatting {
    // Session::run needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl ModnetMatting {
    /// Load the model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `intra_threads` - ONNX Runtime intra-op thread count
    pub fn new<P: AsRef<Path>>(model_path: P, intra_threads: usize) -> anyhow::Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading matting model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "input".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("Matting model has no outputs")?;

        tracing::info!(
            "Matting model loaded, input '{}', output '{}'",
            input_name,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl MattingModel for ModnetMatting {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("modnet_infer").entered();

        let (n, c, h, w) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_array(([n, c, h, w], data)).map_err(PhotoError::inference)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PhotoError::Inference("matting session lock poisoned".into()))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(PhotoError::inference)?;

        let (shape, matte) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(PhotoError::inference)?;
        tracing::debug!("Matte output shape {:?}", shape);

        Ok(matte.to_vec())
    }

    fn name(&self) -> &str {
        "modnet"
    }
}
