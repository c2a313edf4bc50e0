//! Command-line interface for caffe2-rs.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{Caffe2Error, Result};
use crate::inference::InputShape;

/// Run Caffe2 and ONNX image classifiers from Rust.
#[derive(Parser, Debug)]
#[command(name = "caffe2-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a pre-processed input tensor.
    Predict {
        /// Init-net weights, or a packaged .onnx model.
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Predict-net graph (two-file models only).
        #[arg(short, long)]
        graph: Option<PathBuf>,

        /// Path to input data file (JSON with tensor data).
        #[arg(short, long)]
        input: PathBuf,

        /// Device to run on (cpu, cuda:0, cuda:1, etc).
        #[arg(short, long)]
        device: Option<String>,

        /// Batch size; defaults to the config value or the input's batch.
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Number of classes in the output when no outputs are configured.
        #[arg(long, default_value_t = 1000)]
        classes: usize,

        /// Predictions to print per sample.
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,

        /// Write the execution profile to this file.
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Output format (json, pretty).
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Path to YAML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show build information and check that a model loads.
    Info {
        /// Init-net weights, or a packaged .onnx model.
        #[arg(short, long)]
        weights: PathBuf,

        /// Predict-net graph (two-file models only).
        #[arg(short, long)]
        graph: Option<PathBuf>,

        /// Device to load the model on.
        #[arg(short, long, default_value = "cpu")]
        device: String,
    },

    /// Report whether a device can be selected on this machine.
    Probe {
        /// Device to check.
        #[arg(short, long, default_value = "cuda:0")]
        device: String,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Input tensor file: `{ "shape": [N, C, H, W], "data": [...] }`.
///
/// The batch dimension may be omitted (`[C, H, W]`).
#[derive(Debug, Deserialize)]
pub struct InputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Per-sample geometry from the trailing `[C, H, W]`.
    pub fn input_shape(&self) -> Result<InputShape> {
        match self.shape.as_slice() {
            [.., c, h, w] => Ok(InputShape::new(*c, *w, *h)),
            other => Err(Caffe2Error::shape(format!(
                "input shape must end in [C, H, W], got {:?}",
                other
            ))),
        }
    }

    /// Leading batch dimension, 1 when absent.
    pub fn batch(&self) -> usize {
        if self.shape.len() == 4 {
            self.shape[0]
        } else {
            1
        }
    }
}
