//! In-process runtime used by the integration tests.
//!
//! Predictors are boxed Rust structs behind raw pointers. Every allocation
//! handed across the boundary is tracked so tests can check that handles and
//! buffers are released exactly once.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use caffe2_rs::inference::{
    DType, DeviceKind, DeviceSelector, InitOnce, InputShape, ModelSource, NativeRuntime,
    OutputNode, RawPredictor, SessionOptions, TensorDescriptor,
};
use caffe2_rs::Result;
use tempfile::TempDir;

/// Probability given to the winning class of each row.
pub const TOP_PROBABILITY: f32 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Files { init_net: String, predict_net: String },
    Bytes(usize),
}

struct Profile {
    name: String,
    metadata: String,
    start: u64,
    end: u64,
    layers: Vec<serde_json::Value>,
}

struct FakePredictor {
    input: Option<(*const f32, Vec<i64>)>,
    probabilities: Vec<f32>,
    argmax: Vec<i64>,
    batch: usize,
    row_len: usize,
    profiling: bool,
    profile: Option<Profile>,
}

/// A predictor runtime that classifies each sample by its mean value.
///
/// Sample rows whose mean rounds to `v` put `TOP_PROBABILITY` on class
/// `v % classes` and spread the rest evenly. Output 0 is the `[batch,
/// classes]` float32 probabilities, output 1 the `[batch]` int64 argmax.
pub struct FakeRuntime {
    pub classes: usize,
    pub init_calls: AtomicUsize,
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub runs: AtomicUsize,
    pub fail_load: AtomicBool,
    pub fail_run: AtomicBool,
    pub last_kind: Mutex<Option<DeviceKind>>,
    pub last_loaded: Mutex<Option<Loaded>>,
    pub last_input: Mutex<Option<(Vec<f32>, Vec<i64>)>>,
    live: Mutex<HashSet<usize>>,
    buffers: Mutex<HashMap<usize, Vec<u8>>>,
    init: InitOnce,
}

impl FakeRuntime {
    pub fn new(classes: usize) -> Arc<Self> {
        Arc::new(Self {
            classes,
            init_calls: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            fail_load: AtomicBool::new(false),
            fail_run: AtomicBool::new(false),
            last_kind: Mutex::new(None),
            last_loaded: Mutex::new(None),
            last_input: Mutex::new(None),
            live: Mutex::new(HashSet::new()),
            buffers: Mutex::new(HashMap::new()),
            init: InitOnce::new(),
        })
    }

    /// Predictors created and not yet deleted.
    pub fn live_predictors(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Buffers handed out and not yet freed.
    pub fn outstanding_buffers(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    fn register(&self, predictor: FakePredictor) -> RawPredictor {
        let raw = Box::into_raw(Box::new(predictor)) as RawPredictor;
        self.live.lock().unwrap().insert(raw as usize);
        self.created.fetch_add(1, Ordering::SeqCst);
        raw
    }

    fn lend(&self, mut bytes: Vec<u8>) -> *mut c_void {
        let ptr = bytes.as_mut_ptr() as *mut c_void;
        self.buffers.lock().unwrap().insert(ptr as usize, bytes);
        ptr
    }

    unsafe fn predictor<'a>(&self, pred: RawPredictor) -> &'a mut FakePredictor {
        assert!(
            self.live.lock().unwrap().contains(&(pred as usize)),
            "use of a deleted or unknown predictor"
        );
        &mut *(pred as *mut FakePredictor)
    }

    fn new_predictor(&self, kind: DeviceKind) -> RawPredictor {
        *self.last_kind.lock().unwrap() = Some(kind);
        if self.fail_load.load(Ordering::SeqCst) {
            return std::ptr::null_mut();
        }
        self.register(FakePredictor {
            input: None,
            probabilities: Vec::new(),
            argmax: Vec::new(),
            batch: 1,
            row_len: 0,
            profiling: false,
            profile: None,
        })
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl NativeRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn init(&self, kind: DeviceKind) -> Result<()> {
        self.init.call(kind, || {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn new_from_files(&self, init_net: &CStr, predict_net: &CStr, kind: DeviceKind) -> RawPredictor {
        *self.last_loaded.lock().unwrap() = Some(Loaded::Files {
            init_net: init_net.to_string_lossy().into_owned(),
            predict_net: predict_net.to_string_lossy().into_owned(),
        });
        self.new_predictor(kind)
    }

    fn new_from_bytes(&self, model: &[u8], kind: DeviceKind) -> RawPredictor {
        *self.last_loaded.lock().unwrap() = Some(Loaded::Bytes(model.len()));
        self.new_predictor(kind)
    }

    unsafe fn add_input(
        &self,
        pred: RawPredictor,
        index: usize,
        dtype: DType,
        data: *const c_void,
        shape: &[i64],
    ) -> i32 {
        if index != 0 || dtype != DType::F32 {
            return 1;
        }
        let predictor = self.predictor(pred);
        predictor.input = Some((data as *const f32, shape.to_vec()));
        0
    }

    unsafe fn predict(&self, pred: RawPredictor) -> i32 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_run.load(Ordering::SeqCst) {
            return 1;
        }
        let predictor = self.predictor(pred);
        let Some((ptr, shape)) = predictor.input.take() else {
            return 2;
        };
        let numel: i64 = shape.iter().product();
        let data = std::slice::from_raw_parts(ptr, numel as usize).to_vec();
        *self.last_input.lock().unwrap() = Some((data.clone(), shape.clone()));

        let batch = shape[0] as usize;
        let sample_len = data.len() / batch;
        predictor.batch = batch;
        let rest = (1.0 - TOP_PROBABILITY) / (self.classes - 1) as f32;

        predictor.probabilities.clear();
        predictor.argmax.clear();
        for row in data.chunks(sample_len) {
            let mean = row.iter().sum::<f32>() / row.len() as f32;
            let winner = (mean.round().max(0.0) as usize) % self.classes;
            for class in 0..self.classes {
                predictor
                    .probabilities
                    .push(if class == winner { TOP_PROBABILITY } else { rest });
            }
            predictor.argmax.push(winner as i64);
        }

        if predictor.profiling {
            if let Some(profile) = predictor.profile.as_mut() {
                let start = now_ns();
                let index = profile.layers.len() + 1;
                profile.layers.push(serde_json::json!({
                    "name": "Softmax",
                    "metadata": "softmax",
                    "start": start,
                    "end": now_ns(),
                    "thread_id": 1,
                    "layer_sequence_index": index,
                    "shapes": [shape],
                }));
            }
        }
        0
    }

    unsafe fn output(&self, pred: RawPredictor, index: usize) -> *mut c_void {
        let predictor = self.predictor(pred);
        let (bytes, len): (Vec<u8>, usize) = match index {
            0 => (
                predictor
                    .probabilities
                    .iter()
                    .flat_map(|v| v.to_ne_bytes())
                    .collect(),
                predictor.probabilities.len(),
            ),
            1 => (
                predictor
                    .argmax
                    .iter()
                    .flat_map(|v| v.to_ne_bytes())
                    .collect(),
                predictor.argmax.len(),
            ),
            _ => return std::ptr::null_mut(),
        };
        // Like the bridge, the row length is per batch entry and set on fetch
        predictor.row_len = len / predictor.batch;
        self.lend(bytes)
    }

    unsafe fn output_row_len(&self, pred: RawPredictor) -> usize {
        self.predictor(pred).row_len
    }

    unsafe fn free_buffer(&self, buffer: *mut c_void) {
        let freed = self.buffers.lock().unwrap().remove(&(buffer as usize));
        assert!(freed.is_some(), "double free of a native buffer");
    }

    unsafe fn start_profiling(&self, pred: RawPredictor, name: &CStr, metadata: &CStr) {
        let predictor = self.predictor(pred);
        predictor.profiling = true;
        predictor.profile = Some(Profile {
            name: name.to_string_lossy().into_owned(),
            metadata: metadata.to_string_lossy().into_owned(),
            start: now_ns(),
            end: 0,
            layers: Vec::new(),
        });
    }

    unsafe fn end_profiling(&self, pred: RawPredictor) {
        let predictor = self.predictor(pred);
        predictor.profiling = false;
        if let Some(profile) = predictor.profile.as_mut() {
            profile.end = now_ns();
        }
    }

    unsafe fn disable_profiling(&self, pred: RawPredictor) {
        let predictor = self.predictor(pred);
        predictor.profiling = false;
        predictor.profile = None;
    }

    unsafe fn read_profile(&self, pred: RawPredictor) -> *mut c_char {
        let predictor = self.predictor(pred);
        let Some(profile) = predictor.profile.as_ref() else {
            return std::ptr::null_mut();
        };
        let json = serde_json::json!({
            "name": profile.name,
            "metadata": profile.metadata,
            "start": profile.start,
            "end": profile.end,
            "elements": profile.layers,
        });
        let text = CString::new(json.to_string()).unwrap();
        self.lend(text.into_bytes_with_nul()) as *mut c_char
    }

    unsafe fn delete(&self, pred: RawPredictor) {
        let removed = self.live.lock().unwrap().remove(&(pred as usize));
        assert!(removed, "predictor released twice");
        drop(Box::from_raw(pred as *mut FakePredictor));
        self.deleted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Two-file model fixture on disk.
pub struct NetFiles {
    pub dir: TempDir,
    pub init_net: PathBuf,
    pub predict_net: PathBuf,
}

impl NetFiles {
    pub fn new() -> NetFiles {
        let dir = tempfile::tempdir().unwrap();
        let init_net = dir.path().join("init_net.pb");
        let predict_net = dir.path().join("predict_net.pb");
        std::fs::write(&init_net, b"init-net weights").unwrap();
        std::fs::write(&predict_net, b"predict-net graph").unwrap();
        NetFiles {
            dir,
            init_net,
            predict_net,
        }
    }

    pub fn source(&self) -> ModelSource {
        ModelSource::detect(&self.init_net, Some(self.predict_net.clone())).unwrap()
    }
}

/// Write a packaged model of `len` bytes.
pub fn onnx_file(dir: &Path, len: usize) -> PathBuf {
    let path = dir.join("model.onnx");
    std::fs::write(&path, vec![7u8; len]).unwrap();
    path
}

/// Options for a `classes`-way classifier over `[3, 2, 2]` inputs.
pub fn classifier_options(model: ModelSource, batch_size: usize, classes: usize) -> SessionOptions {
    SessionOptions::new(model, InputShape::new(3, 2, 2))
        .with_batch_size(batch_size)
        .with_output(OutputNode::new(
            "softmax",
            TensorDescriptor::new(DType::F32, vec![batch_size, classes]).unwrap(),
        ))
        .with_output(OutputNode::new(
            "argmax",
            TensorDescriptor::new(DType::I64, vec![batch_size]).unwrap(),
        ))
}

/// A selector that never finds an accelerator.
pub fn cpu_only() -> DeviceSelector {
    DeviceSelector::new(Arc::new(false))
}

/// One `[3, 2, 2]` sample filled with `value`.
pub fn sample(value: f32) -> Vec<f32> {
    vec![value; 12]
}
