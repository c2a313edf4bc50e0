//! Configuration types for caffe2-rs.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{Caffe2Error, Result};
use crate::inference::{
    Device, DType, InputShape, ModelSource, OutputNode, SessionOptions, TensorDescriptor,
};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Inference configuration.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Output nodes to read back, in order.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// Model configuration.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Init-net weights, or a packaged `.onnx` model.
    #[serde(default)]
    pub weights: Option<PathBuf>,

    /// Predict-net graph (two-file models only).
    #[serde(default)]
    pub graph: Option<PathBuf>,

    /// Device to load model on.
    #[serde(default = "default_device")]
    pub device: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights: None,
            graph: None,
            device: default_device(),
        }
    }
}

/// Inference configuration. Unset fields fall back to the input tensor,
/// then to the defaults below.
#[derive(Debug, Default, Deserialize)]
pub struct InferenceConfig {
    /// Batch size for inference.
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Input channels.
    #[serde(default)]
    pub channels: Option<usize>,

    /// Input width in pixels.
    #[serde(default)]
    pub width: Option<usize>,

    /// Input height in pixels.
    #[serde(default)]
    pub height: Option<usize>,
}

impl InferenceConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or_else(default_batch_size)
    }

    /// Per-sample input geometry.
    pub fn input_shape(&self) -> InputShape {
        InputShape::new(
            self.channels.unwrap_or_else(default_channels),
            self.width.unwrap_or_else(default_image_size),
            self.height.unwrap_or_else(default_image_size),
        )
    }
}

/// A declared output node.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    pub name: String,

    #[serde(default = "default_dtype")]
    pub dtype: String,

    pub shape: Vec<usize>,
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_channels() -> usize {
    3
}

fn default_image_size() -> usize {
    224
}

fn default_dtype() -> String {
    "float32".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Apply command-line flags. Each flag given replaces its config value.
    pub fn apply_flags(
        &mut self,
        weights: Option<PathBuf>,
        graph: Option<PathBuf>,
        device: Option<String>,
        batch_size: Option<usize>,
    ) {
        if weights.is_some() {
            self.model.weights = weights;
        }
        if graph.is_some() {
            self.model.graph = graph;
        }
        if let Some(device) = device {
            self.model.device = device;
        }
        if batch_size.is_some() {
            self.inference.batch_size = batch_size;
        }
    }

    /// Fill unset inference fields from the input tensor's batch and
    /// geometry. Geometry the config does set must match the input.
    pub fn fit_input(&mut self, batch: usize, geometry: InputShape) -> Result<()> {
        let inference = &mut self.inference;
        inference.batch_size.get_or_insert(batch);

        let dims = [
            ("channels", &mut inference.channels, geometry.channels),
            ("width", &mut inference.width, geometry.width),
            ("height", &mut inference.height, geometry.height),
        ];
        for (name, configured, actual) in dims {
            match *configured {
                Some(expected) if expected != actual => {
                    return Err(Caffe2Error::shape(format!(
                        "input {} is {}, config expects {}",
                        name, actual, expected
                    )));
                }
                Some(_) => {}
                None => *configured = Some(actual),
            }
        }
        Ok(())
    }

    /// Declared output nodes, validated.
    pub fn output_nodes(&self) -> Result<Vec<OutputNode>> {
        self.outputs
            .iter()
            .map(|out| {
                let dtype: DType = out.dtype.parse()?;
                let descriptor = TensorDescriptor::new(dtype, out.shape.clone())?;
                Ok(OutputNode::new(out.name.clone(), descriptor))
            })
            .collect()
    }

    /// Build session options, validating every field.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let weights = self
            .model
            .weights
            .clone()
            .ok_or_else(|| Caffe2Error::config("model.weights is required"))?;
        let model = ModelSource::detect(weights, self.model.graph.clone())?;
        let device: Device = self.model.device.parse()?;

        let batch_size = self.inference.batch_size();
        if batch_size == 0 {
            return Err(Caffe2Error::config("inference.batch_size must be positive"));
        }
        let input = self.inference.input_shape();
        if input.sample_len() == 0 {
            return Err(Caffe2Error::config(format!(
                "input dimensions must be positive, got {:?}",
                input
            )));
        }

        let mut options = SessionOptions::new(model, input)
            .with_device(device)
            .with_batch_size(batch_size);
        options.outputs = self.output_nodes()?;
        Ok(options)
    }
}
