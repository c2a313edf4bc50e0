//! Safe inference sessions over a native predictor.
//!
//! An [`InferenceSession`] owns exactly one native predictor. The predictor
//! is released when the session is closed or dropped, whichever comes first,
//! and never twice.
//!
//! # Threading
//!
//! The native predictor has no internal synchronization. Sessions are `Send`
//! but not `Sync`: to share one between threads, put it behind a
//! `Mutex`. Independent sessions can run in parallel.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use caffe2_rs::inference::{
//!     Caffe2Runtime, DeviceSelector, InferenceSession, InputShape, ModelSource, SessionOptions,
//! };
//!
//! let model = ModelSource::detect("init_net.pb", Some("predict_net.pb".into()))?;
//! let options = SessionOptions::new(model, InputShape::new(3, 224, 224)).with_batch_size(4);
//! let mut session =
//!     InferenceSession::create(Arc::new(Caffe2Runtime), &DeviceSelector::default(), options)?;
//!
//! session.predict(&[image])?;
//! let outputs = session.read_output()?;
//! session.close();
//! ```

use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, info};

use super::buffer::{BatchBuffer, BufferMarshaler, InputShape};
use super::device::{Device, DeviceSelector};
use super::prediction::Predictions;
use super::profiling::{ProfileTarget, ProfilingSession, TraceBuffer};
use super::runtime::{NativeRuntime, RawPredictor};
use super::tensor::{decode, DType, ForeignBuffer, OutputNode, Tensor};
use crate::error::{Caffe2Error, Result};

/// File extensions of single-file packaged models.
const PACKAGED_EXTENSIONS: &[&str] = &["onnx"];

/// Where the model weights and graph come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Separate init-net (weights) and predict-net (graph) protobufs.
    NetFiles {
        init_net: PathBuf,
        predict_net: PathBuf,
    },
    /// A single packaged model, loaded from memory.
    Packaged(PathBuf),
}

impl ModelSource {
    /// Pick the convention from the supplied paths.
    ///
    /// A weights path with a packaged extension (`.onnx`) is loaded on its
    /// own and `graph` is ignored; anything else needs both files.
    pub fn detect(weights: impl Into<PathBuf>, graph: Option<PathBuf>) -> Result<Self> {
        let weights = weights.into();
        if is_packaged(&weights) {
            return Ok(Self::Packaged(weights));
        }
        match graph {
            Some(predict_net) => Ok(Self::NetFiles {
                init_net: weights,
                predict_net,
            }),
            None => Err(Caffe2Error::config(format!(
                "{} is not a packaged model; a predict net path is required",
                weights.display()
            ))),
        }
    }

    /// Every file this source needs.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::NetFiles {
                init_net,
                predict_net,
            } => vec![init_net, predict_net],
            Self::Packaged(path) => vec![path],
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetFiles {
                init_net,
                predict_net,
            } => write!(f, "{} + {}", init_net.display(), predict_net.display()),
            Self::Packaged(path) => write!(f, "{}", path.display()),
        }
    }
}

fn is_packaged(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PACKAGED_EXTENSIONS
                .iter()
                .any(|p| ext.eq_ignore_ascii_case(p))
        })
        .unwrap_or(false)
}

/// Everything needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: ModelSource,
    pub device: Device,
    pub batch_size: usize,
    pub input: InputShape,
    /// Graph outputs to read back, in order.
    pub outputs: Vec<OutputNode>,
}

impl SessionOptions {
    /// CPU, batch size 1, no declared outputs.
    pub fn new(model: ModelSource, input: InputShape) -> Self {
        Self {
            model,
            device: Device::Cpu,
            batch_size: 1,
            input,
            outputs: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_output(mut self, output: OutputNode) -> Self {
        self.outputs.push(output);
        self
    }
}

/// Model contents prepared for the native constructor.
enum ModelPayload {
    NetFiles { init_net: CString, predict_net: CString },
    Packaged(Vec<u8>),
}

impl ModelPayload {
    /// Read the model. Call [`check_model_files`] first.
    fn load(source: &ModelSource) -> Result<Self> {
        match source {
            ModelSource::NetFiles {
                init_net,
                predict_net,
            } => Ok(Self::NetFiles {
                init_net: path_to_cstring(init_net)?,
                predict_net: path_to_cstring(predict_net)?,
            }),
            ModelSource::Packaged(path) => std::fs::read(path)
                .map(Self::Packaged)
                .map_err(|_| Caffe2Error::ModelFileNotFound(path.clone())),
        }
    }
}

/// Every file of `source` exists and can be opened.
fn check_model_files(source: &ModelSource) -> Result<()> {
    for path in source.paths() {
        if !path.is_file() || File::open(path).is_err() {
            return Err(Caffe2Error::ModelFileNotFound(path.to_path_buf()));
        }
    }
    Ok(())
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    let path_str = path.to_string_lossy();
    CString::new(path_str.as_ref()).map_err(|_| Caffe2Error::config("Invalid path encoding"))
}

/// Exclusive owner of one native predictor.
struct NativePredictor {
    raw: NonNull<c_void>,
    runtime: Arc<dyn NativeRuntime>,
}

// SAFETY: the predictor may move between threads; it is not `Sync`, so calls
// on it are never concurrent.
unsafe impl Send for NativePredictor {}

impl NativePredictor {
    fn raw(&self) -> RawPredictor {
        self.raw.as_ptr()
    }

    /// Bind `batch` as input 0 and run. `batch` outlives both calls.
    fn run(&self, batch: &BatchBuffer) -> Result<()> {
        let dims = batch.native_dims();
        let status = unsafe {
            self.runtime.add_input(
                self.raw(),
                0,
                DType::F32,
                batch.as_ptr().cast::<c_void>(),
                &dims,
            )
        };
        if status != 0 {
            return Err(Caffe2Error::inference(format!(
                "binding input {:?} failed with status {}",
                dims, status
            )));
        }

        let status = unsafe { self.runtime.predict(self.raw()) };
        if status != 0 {
            return Err(Caffe2Error::inference(format!(
                "{} predict returned status {}",
                self.runtime.name(),
                status
            )));
        }
        Ok(())
    }

    /// Copy output `index` out of a run over `batch_size` rows.
    fn read_output(&self, index: usize, node: &OutputNode, batch_size: usize) -> Result<Tensor> {
        let ptr = unsafe { self.runtime.output(self.raw(), index) };
        let buffer = OutputBuffer::new(self, ptr).ok_or_else(|| {
            Caffe2Error::inference(format!("output {} ({}) is unavailable", index, node.name))
        })?;
        // Only valid once the output above has been fetched
        let row_len = unsafe { self.runtime.output_row_len(self.raw()) };
        let len = row_len.checked_mul(batch_size).ok_or_else(|| {
            Caffe2Error::shape(format!(
                "output {} ({}) length overflows: {} x {}",
                index, node.name, row_len, batch_size
            ))
        })?;
        let view = buffer.view(len, node.descriptor.dtype().size_in_bytes())?;
        decode(&view, &node.descriptor)
    }
}

impl Drop for NativePredictor {
    fn drop(&mut self) {
        unsafe { self.runtime.delete(self.raw()) };
    }
}

impl ProfileTarget for NativePredictor {
    fn start(&self, name: &CString, metadata: &CString) {
        unsafe { self.runtime.start_profiling(self.raw(), name, metadata) }
    }

    fn end(&self) {
        unsafe { self.runtime.end_profiling(self.raw()) }
    }

    fn read(&self) -> Option<Vec<u8>> {
        let ptr = unsafe { self.runtime.read_profile(self.raw()) };
        if ptr.is_null() {
            return None;
        }
        let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes().to_vec();
        unsafe { self.runtime.free_buffer(ptr.cast::<c_void>()) };
        Some(bytes)
    }

    fn disable(&self) {
        unsafe { self.runtime.disable_profiling(self.raw()) }
    }
}

/// A runtime-allocated output copy, handed back on drop.
struct OutputBuffer<'p> {
    ptr: NonNull<c_void>,
    owner: &'p NativePredictor,
}

impl<'p> OutputBuffer<'p> {
    fn new(owner: &'p NativePredictor, ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, owner })
    }

    fn view(&self, len: usize, width: usize) -> Result<ForeignBuffer<'_>> {
        // SAFETY: the runtime allocated `len` elements of `width` bytes and
        // keeps them until `free_buffer`, which only runs when `self` drops.
        unsafe { ForeignBuffer::from_raw(self.ptr.as_ptr(), len, width) }
    }
}

impl Drop for OutputBuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.owner.runtime.free_buffer(self.ptr.as_ptr()) };
    }
}

/// A loaded model bound to a native predictor.
pub struct InferenceSession {
    predictor: Option<NativePredictor>,
    options: SessionOptions,
    device: Device,
    marshaler: BufferMarshaler,
    profiler: ProfilingSession,
    /// Real samples in the last successful run.
    last_samples: Option<usize>,
}

impl InferenceSession {
    /// Load a model into `runtime`.
    ///
    /// Model files are checked before the device is resolved, and the device
    /// is resolved before the model is read or anything native is touched.
    ///
    /// # Errors
    ///
    /// `ModelFileNotFound`, `DeviceUnavailable`, or `NativeInitFailure` when
    /// the runtime cannot be initialized or returns a null predictor.
    pub fn create(
        runtime: Arc<dyn NativeRuntime>,
        selector: &DeviceSelector,
        options: SessionOptions,
    ) -> Result<Self> {
        check_model_files(&options.model)?;
        let device = selector.resolve(options.device)?;
        let kind = device.kind();
        let payload = ModelPayload::load(&options.model)?;

        runtime.init(kind)?;

        info!("Loading model {} on {}", options.model, device);
        let raw = match &payload {
            ModelPayload::NetFiles {
                init_net,
                predict_net,
            } => runtime.new_from_files(init_net, predict_net, kind),
            ModelPayload::Packaged(bytes) => runtime.new_from_bytes(bytes, kind),
        };
        let raw = NonNull::new(raw).ok_or_else(|| {
            Caffe2Error::native_init(format!(
                "{} returned a null predictor for {}",
                runtime.name(),
                options.model
            ))
        })?;

        let marshaler = BufferMarshaler::new(options.batch_size, options.input);
        Ok(Self {
            predictor: Some(NativePredictor { raw, runtime }),
            options,
            device,
            marshaler,
            profiler: ProfilingSession::new(),
            last_samples: None,
        })
    }

    /// The resolved device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.predictor.is_none()
    }

    fn predictor(&self) -> Result<&NativePredictor> {
        self.predictor.as_ref().ok_or(Caffe2Error::SessionClosed)
    }

    /// Run the model on up to `batch_size` samples.
    ///
    /// Each slice holds one or more flat CHW samples. Short batches are
    /// zero-padded. Blocks until the runtime finishes.
    pub fn predict<S: AsRef<[f32]>>(&mut self, samples: &[S]) -> Result<()> {
        let predictor = self.predictor.as_ref().ok_or(Caffe2Error::SessionClosed)?;
        let batch = self.marshaler.prepare(samples)?;

        self.last_samples = None;
        debug!(
            "Running batch of {} ({} padded)",
            batch.samples(),
            batch.batch_size() - batch.samples()
        );
        predictor.run(&batch)?;
        self.last_samples = Some(batch.samples());
        Ok(())
    }

    /// Decode every declared output node, in declaration order.
    ///
    /// Fails as a whole if any node cannot be read.
    pub fn read_output(&self) -> Result<Vec<Tensor>> {
        let predictor = self.predictor()?;
        if self.last_samples.is_none() {
            return Err(Caffe2Error::OutputNotReady);
        }
        self.options
            .outputs
            .iter()
            .enumerate()
            .map(|(index, node)| predictor.read_output(index, node, self.options.batch_size))
            .collect()
    }

    /// Per-sample class probabilities from the first output node.
    ///
    /// The node must be float32 with the batch as its leading dimension.
    /// Rows that only held padding are dropped.
    pub fn predictions(&self) -> Result<Vec<Predictions>> {
        let predictor = self.predictor()?;
        let node = self
            .options
            .outputs
            .first()
            .ok_or_else(|| Caffe2Error::config("no output nodes declared"))?;
        if node.descriptor.dtype() != DType::F32 {
            return Err(Caffe2Error::UnsupportedDType(format!(
                "predictions need a float32 output, {} is {}",
                node.name,
                node.descriptor.dtype()
            )));
        }
        let samples = self.last_samples.ok_or(Caffe2Error::OutputNotReady)?;

        let tensor = predictor.read_output(0, node, self.options.batch_size)?;
        let probabilities: Vec<f32> = match tensor {
            Tensor::F32(data) => data.iter().copied().collect(),
            other => {
                return Err(Caffe2Error::UnsupportedDType(other.dtype().to_string()));
            }
        };
        Predictions::from_batch(&probabilities, self.options.batch_size, samples)
    }

    /// Start recording a profile of the following runs.
    pub fn start_profiling(&mut self, name: &str, metadata: &str) -> Result<()> {
        let predictor = self.predictor.as_ref().ok_or(Caffe2Error::SessionClosed)?;
        self.profiler.start(predictor, name, metadata)
    }

    /// Stop recording.
    pub fn end_profiling(&mut self) -> Result<()> {
        let predictor = self.predictor.as_ref().ok_or(Caffe2Error::SessionClosed)?;
        self.profiler.end(predictor)
    }

    /// Take the finished trace.
    pub fn read_profile(&mut self) -> Result<TraceBuffer> {
        let predictor = self.predictor.as_ref().ok_or(Caffe2Error::SessionClosed)?;
        self.profiler.read(predictor)
    }

    /// Discard profiling state and return to idle.
    pub fn disable_profiling(&mut self) -> Result<()> {
        let predictor = self.predictor.as_ref().ok_or(Caffe2Error::SessionClosed)?;
        self.profiler.disable(predictor);
        Ok(())
    }

    pub fn profiler(&self) -> &ProfilingSession {
        &self.profiler
    }

    /// Release the native predictor. Calling this again does nothing.
    pub fn close(&mut self) {
        if let Some(predictor) = self.predictor.take() {
            self.profiler = ProfilingSession::new();
            self.last_samples = None;
            drop(predictor);
            info!("Closed session for {}", self.options.model);
        }
    }
}

impl fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceSession")
            .field("model", &self.options.model)
            .field("device", &self.device)
            .field("closed", &self.is_closed())
            .finish()
    }
}
