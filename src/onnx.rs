//! ONNX Runtime backend for the contact model.
//!
//! The Keras models are exported as three graphs: the whisker-pad keypoint
//! model, the convolutional backbone of the classifier, and the classifier's
//! temporal layers. Each graph takes one input and its first output is used.

use std::path::Path;

use log::info;
use ndarray::{Array2, Array3, Array4, ArrayD, Ix2, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::config::ModelConfig;
use crate::model::{CroppedContactModel, EmbeddingBackbone, KeypointModel, SequenceClassifier};
use crate::types::*;

pub struct OnnxModel {
    session: Session,
}

impl OnnxModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| AnalysisError::Model(format!("failed to load {}: {}", path.display(), e)))?;
        info!("Loaded model {}", path.display());
        Ok(Self { session })
    }

    fn run(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let tensor = Tensor::from_array(input).map_err(model_error)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(model_error)?;
        let output: ndarray::ArrayViewD<f32> =
            outputs[0].try_extract_array().map_err(model_error)?;
        Ok(output.to_owned())
    }
}

fn model_error(e: ort::Error) -> AnalysisError {
    AnalysisError::Model(e.to_string())
}

fn shape_error(e: ndarray::ShapeError) -> AnalysisError {
    AnalysisError::ShapeMismatch(e.to_string())
}

impl KeypointModel for OnnxModel {
    fn heatmaps(&mut self, frames: &Array4<f32>) -> Result<Array4<f32>> {
        self.run(frames.clone().into_dyn())?
            .into_dimensionality::<Ix4>()
            .map_err(shape_error)
    }
}

impl EmbeddingBackbone for OnnxModel {
    fn features(&mut self, crops: &Array4<f32>) -> Result<Array2<f32>> {
        let output = self.run(crops.clone().into_dyn())?;
        // Flatten anything after the batch axis
        let n = output.shape()[0];
        let width = output.len() / n.max(1);
        output
            .into_shape_with_order((n, width))
            .map_err(shape_error)
    }
}

impl SequenceClassifier for OnnxModel {
    fn classify(&mut self, sessions: &Array3<f32>) -> Result<Array2<f32>> {
        self.run(sessions.clone().into_dyn())?
            .into_dimensionality::<Ix2>()
            .map_err(shape_error)
    }
}

/// Loads the three exported graphs named in `config`.
pub fn load_contact_model(
    config: &ModelConfig,
) -> Result<CroppedContactModel<OnnxModel, OnnxModel, OnnxModel>> {
    Ok(CroppedContactModel::new(
        OnnxModel::load(config.keypoint_path())?,
        OnnxModel::load(config.backbone_path())?,
        OnnxModel::load(config.sequence_path())?,
        config.crop,
    ))
}
