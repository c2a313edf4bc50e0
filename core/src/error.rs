//! Error types for caffe2-rs.

use std::path::PathBuf;
use thiserror::Error;

use crate::inference::Device;

/// Result type alias for caffe2-rs operations.
pub type Result<T> = std::result::Result<T, Caffe2Error>;

/// Errors that can occur while driving a native predictor.
#[derive(Debug, Error)]
pub enum Caffe2Error {
    /// A model file does not exist or is not a regular file.
    #[error("Model file not found: {}", .0.display())]
    ModelFileNotFound(PathBuf),

    /// The requested device is not present on this machine.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(Device),

    /// The native runtime refused to construct a predictor.
    #[error("Native initialization failed: {0}")]
    NativeInitFailure(String),

    /// No input data was supplied.
    #[error("Input data is empty")]
    EmptyInput,

    /// Element counts or dimensions do not line up.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The dtype is not one of the supported element types.
    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(String),

    /// The native runtime reported a failed execution.
    #[error("Inference failed: {0}")]
    InferenceExecutionFailure(String),

    /// A profile is already being recorded.
    #[error("Profiling is already active")]
    ProfilingAlreadyActive,

    /// There is no finished profile to read.
    #[error("Profile not ready")]
    ProfileNotReady,

    /// The native profiler returned no trace.
    #[error("Failed to read profile from the native runtime")]
    ProfileReadFailure,

    /// The session has already been closed.
    #[error("Session is closed")]
    SessionClosed,

    /// Outputs were requested before any prediction ran.
    #[error("No outputs available; run predict first")]
    OutputNotReady,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Caffe2Error {
    /// Create a native initialization error.
    pub fn native_init(msg: impl Into<String>) -> Self {
        Self::NativeInitFailure(msg.into())
    }

    /// Create an inference error.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::InferenceExecutionFailure(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The session that produced this error should be closed, not reused.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::NativeInitFailure(_) | Self::InferenceExecutionFailure(_)
        )
    }

    /// Errors caused by bad arguments, detected before any native call.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput | Self::ShapeMismatch(_) | Self::ModelFileNotFound(_)
        )
    }
}
