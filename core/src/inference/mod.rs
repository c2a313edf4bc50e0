//! Model inference module.
//!
//! This module provides FFI bindings to the C predictor bridge and safe
//! Rust wrappers for device selection, batch marshaling, output decoding,
//! profiling and the session lifecycle.

mod buffer;
mod device;
#[cfg(feature = "caffe2")]
mod ffi;
mod prediction;
mod profiling;
mod runtime;
mod session;
mod tensor;

pub use buffer::{prepare, BatchBuffer, BufferMarshaler, InputShape};
pub use device::{Device, DeviceKind, DeviceSelector, HardwareProbe, SystemProbe};
pub use prediction::{top_k, Prediction, Predictions};
pub use profiling::{
    ProfileEntry, ProfileTarget, ProfileTrace, ProfilerState, ProfilingSession, TraceBuffer,
};
#[cfg(feature = "caffe2")]
pub use runtime::Caffe2Runtime;
pub use runtime::{InitOnce, NativeRuntime, RawPredictor};
pub use session::{InferenceSession, ModelSource, SessionOptions};
pub use tensor::{decode, DType, Element, ForeignBuffer, OutputNode, Tensor, TensorDescriptor};
