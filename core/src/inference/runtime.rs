//! The contract between a session and the native runtime that executes it.
//!
//! [`NativeRuntime`] mirrors the C bridge one call per method. Sessions
//! never touch the FFI directly; they go through this trait so the same
//! lifecycle and marshaling code drives the linked Caffe2 bridge
//! ([`Caffe2Runtime`], behind the `caffe2` feature) or any other
//! implementation.

use once_cell::sync::OnceCell;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

use super::device::DeviceKind;
use super::tensor::DType;
use crate::error::{Caffe2Error, Result};

/// Raw pointer to a predictor owned by the native runtime.
pub type RawPredictor = *mut c_void;

/// Raw entry points of a native predictor runtime.
///
/// Status-returning calls use `0` for success. Constructors return null on
/// failure. Every `unsafe` method requires `pred` to be a live predictor
/// returned by one of the constructors of the same runtime and not yet
/// passed to [`NativeRuntime::delete`].
pub trait NativeRuntime: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Process-wide initialization for `kind`. Must be idempotent and safe
    /// to call from several threads.
    fn init(&self, kind: DeviceKind) -> Result<()>;

    /// Build a predictor from an init-net and a predict-net file.
    fn new_from_files(&self, init_net: &CStr, predict_net: &CStr, kind: DeviceKind) -> RawPredictor;

    /// Build a predictor from a packaged (ONNX) model held in memory.
    fn new_from_bytes(&self, model: &[u8], kind: DeviceKind) -> RawPredictor;

    /// Bind input `index` to `data`.
    ///
    /// # Safety
    ///
    /// `data` must point to `product(shape)` elements of `dtype` and stay
    /// valid and unmoved until the next [`NativeRuntime::predict`] returns.
    unsafe fn add_input(
        &self,
        pred: RawPredictor,
        index: usize,
        dtype: DType,
        data: *const c_void,
        shape: &[i64],
    ) -> i32;

    /// Run the predict net on the bound inputs.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn predict(&self, pred: RawPredictor) -> i32;

    /// Copy of output `index`, allocated by the runtime; null on failure.
    /// Must be released with [`NativeRuntime::free_buffer`].
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn output(&self, pred: RawPredictor, index: usize) -> *mut c_void;

    /// Elements per batch row of the output most recently returned by
    /// [`NativeRuntime::output`]. The whole buffer holds this many elements
    /// times the input batch size.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn output_row_len(&self, pred: RawPredictor) -> usize;

    /// Release a buffer returned by [`NativeRuntime::output`] or
    /// [`NativeRuntime::read_profile`].
    ///
    /// # Safety
    ///
    /// `buffer` must come from this runtime and not have been freed.
    unsafe fn free_buffer(&self, buffer: *mut c_void);

    /// Record subsequent runs under `name` and `metadata`.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn start_profiling(&self, pred: RawPredictor, name: &CStr, metadata: &CStr);

    /// Stop recording.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn end_profiling(&self, pred: RawPredictor);

    /// Drop any recorded profile.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn disable_profiling(&self, pred: RawPredictor);

    /// Serialized trace as a NUL-terminated string, or null.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn read_profile(&self, pred: RawPredictor) -> *mut c_char;

    /// Destroy the predictor.
    ///
    /// # Safety
    ///
    /// `pred` must not be used again afterwards.
    unsafe fn delete(&self, pred: RawPredictor);
}

/// One-time initialization state, tracked per device kind.
///
/// The first caller for a kind runs the initializer; everyone after that,
/// on any thread, observes the same outcome.
#[derive(Debug, Default)]
pub struct InitOnce {
    cpu: OnceCell<std::result::Result<(), String>>,
    cuda: OnceCell<std::result::Result<(), String>>,
}

impl InitOnce {
    pub const fn new() -> Self {
        Self {
            cpu: OnceCell::new(),
            cuda: OnceCell::new(),
        }
    }

    /// Run `init` for `kind` unless it already ran.
    pub fn call<F>(&self, kind: DeviceKind, init: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), String>,
    {
        let cell = match kind {
            DeviceKind::Cpu => &self.cpu,
            DeviceKind::Cuda => &self.cuda,
        };
        cell.get_or_init(init)
            .clone()
            .map_err(Caffe2Error::NativeInitFailure)
    }

    /// Whether `kind` has been initialized successfully.
    pub fn is_initialized(&self, kind: DeviceKind) -> bool {
        let cell = match kind {
            DeviceKind::Cpu => &self.cpu,
            DeviceKind::Cuda => &self.cuda,
        };
        matches!(cell.get(), Some(Ok(())))
    }
}

#[cfg(feature = "caffe2")]
pub use self::caffe2::Caffe2Runtime;

#[cfg(feature = "caffe2")]
mod caffe2 {
    use std::ffi::{c_void, CStr};
    use std::os::raw::{c_char, c_int};

    use super::{InitOnce, NativeRuntime, RawPredictor};
    use crate::error::Result;
    use crate::inference::device::DeviceKind;
    use crate::inference::ffi;
    use crate::inference::tensor::DType;

    static INIT: InitOnce = InitOnce::new();

    /// The linked Caffe2 predictor bridge.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Caffe2Runtime;

    impl NativeRuntime for Caffe2Runtime {
        fn name(&self) -> &'static str {
            "caffe2"
        }

        fn init(&self, kind: DeviceKind) -> Result<()> {
            // The bridge reports nothing back; failures abort inside it
            INIT.call(kind, || {
                unsafe { ffi::InitCaffe2(kind) };
                Ok(())
            })
        }

        // The bridge takes `char *` but only reads through it.
        fn new_from_files(
            &self,
            init_net: &CStr,
            predict_net: &CStr,
            kind: DeviceKind,
        ) -> RawPredictor {
            unsafe {
                ffi::NewCaffe2(
                    init_net.as_ptr() as *mut c_char,
                    predict_net.as_ptr() as *mut c_char,
                    kind,
                )
            }
        }

        fn new_from_bytes(&self, model: &[u8], kind: DeviceKind) -> RawPredictor {
            unsafe {
                ffi::NewCaffe2FromOnnx(model.as_ptr() as *mut c_char, model.len() as i64, kind)
            }
        }

        unsafe fn add_input(
            &self,
            pred: RawPredictor,
            index: usize,
            dtype: DType,
            data: *const c_void,
            shape: &[i64],
        ) -> i32 {
            ffi::AddInputCaffe2(
                pred,
                index as i64,
                dtype.code(),
                data as *mut c_void,
                shape.as_ptr() as *mut i64,
                shape.len() as i64,
            )
        }

        unsafe fn predict(&self, pred: RawPredictor) -> i32 {
            ffi::PredictCaffe2(pred)
        }

        unsafe fn output(&self, pred: RawPredictor, index: usize) -> *mut c_void {
            ffi::GetPredictionsCaffe2(pred, index as c_int)
        }

        unsafe fn output_row_len(&self, pred: RawPredictor) -> usize {
            ffi::GetPredLenCaffe2(pred).max(0) as usize
        }

        unsafe fn free_buffer(&self, buffer: *mut c_void) {
            ffi::free(buffer)
        }

        unsafe fn start_profiling(&self, pred: RawPredictor, name: &CStr, metadata: &CStr) {
            ffi::StartProfilingCaffe2(pred, name.as_ptr(), metadata.as_ptr())
        }

        unsafe fn end_profiling(&self, pred: RawPredictor) {
            ffi::EndProfilingCaffe2(pred)
        }

        unsafe fn disable_profiling(&self, pred: RawPredictor) {
            ffi::DisableProfilingCaffe2(pred)
        }

        unsafe fn read_profile(&self, pred: RawPredictor) -> *mut c_char {
            ffi::ReadProfileCaffe2(pred)
        }

        unsafe fn delete(&self, pred: RawPredictor) {
            ffi::DeleteCaffe2(pred)
        }
    }
}
