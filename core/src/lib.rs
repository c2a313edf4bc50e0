//! caffe2-rs: run Caffe2 and ONNX image classifiers from Rust.
//!
//! This crate drives a native Caffe2 predictor through a small C bridge. It
//! owns the predictor handle, chooses between CPU and CUDA, packs image
//! batches into the fixed-size tensor the predictor expects, copies outputs
//! back into `ndarray` tensors and controls the bridge's execution profiler.
//!
//! # Features
//!
//! - **caffe2**: Link the native predictor bridge (required for the binary)
//! - **cuda**: Enable CUDA accelerator support (implies `caffe2`)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use caffe2_rs::inference::{
//!     Caffe2Runtime, DType, DeviceSelector, InferenceSession, InputShape, ModelSource,
//!     OutputNode, SessionOptions, TensorDescriptor,
//! };
//!
//! let model = ModelSource::detect("init_net.pb", Some("predict_net.pb".into()))?;
//! let options = SessionOptions::new(model, InputShape::new(3, 227, 227))
//!     .with_output(OutputNode::new(
//!         "softmax",
//!         TensorDescriptor::new(DType::F32, vec![1, 1000])?,
//!     ));
//!
//! let mut session =
//!     InferenceSession::create(Arc::new(Caffe2Runtime), &DeviceSelector::default(), options)?;
//! session.predict(&[image])?;
//! for prediction in session.predictions()?[0].top_k(5) {
//!     println!("{}: {:.4}", prediction.index, prediction.probability);
//! }
//! session.close();
//! ```
//!
//! # Building
//!
//! With the `caffe2` feature the build script links `libcaffe2_predictor`,
//! found through `CAFFE2_BRIDGE_DIR` or `CAFFE2_HOME` (default `/opt/caffe2`).
//!
//! ```bash
//! CAFFE2_HOME=/opt/caffe2 cargo build --release --features caffe2
//!
//! # With CUDA support
//! cargo build --release --features cuda
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod inference;

// Re-export commonly used types
pub use error::{Caffe2Error, Result};
pub use inference::{Device, InferenceSession, Prediction, Predictions, SessionOptions, Tensor};
