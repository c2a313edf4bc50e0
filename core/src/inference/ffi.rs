//! FFI declarations for the C predictor bridge.
//!
//! Signatures follow `include/caffe2_predictor.h`. Use the safe wrappers
//! in the `session` module instead of calling these directly.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

use super::device::DeviceKind;

/// Opaque handle to the C++ predictor.
pub type PredictorContext = *mut c_void;

/// `error_t`; zero is success.
pub type Status = c_int;

extern "C" {
    // Process-wide setup, guarded inside the bridge
    pub fn InitCaffe2(device_kind: DeviceKind);

    // Predictor lifecycle
    pub fn NewCaffe2(
        init_net_file: *mut c_char,
        pred_net_file: *mut c_char,
        device_kind: DeviceKind,
    ) -> PredictorContext;
    pub fn NewCaffe2FromOnnx(
        model_data: *mut c_char,
        model_data_len: i64,
        device_kind: DeviceKind,
    ) -> PredictorContext;
    pub fn DeleteCaffe2(pred: PredictorContext);

    // Inference
    pub fn AddInputCaffe2(
        pred: PredictorContext,
        idx: i64,
        ty: c_int,
        data: *mut c_void,
        shape: *mut i64,
        ndims: i64,
    ) -> Status;
    pub fn PredictCaffe2(pred: PredictorContext) -> Status;
    /// `malloc`ed copy of output `idx`; also records its per-sample length.
    pub fn GetPredictionsCaffe2(pred: PredictorContext, idx: c_int) -> *mut c_void;
    /// Elements per batch row of the last output fetched.
    pub fn GetPredLenCaffe2(pred: PredictorContext) -> c_int;

    // Profiling
    pub fn StartProfilingCaffe2(
        pred: PredictorContext,
        name: *const c_char,
        metadata: *const c_char,
    );
    pub fn EndProfilingCaffe2(pred: PredictorContext);
    pub fn DisableProfilingCaffe2(pred: PredictorContext);
    /// `strdup`ed trace.
    pub fn ReadProfileCaffe2(pred: PredictorContext) -> *mut c_char;

    // C runtime; releases bridge outputs and traces
    pub fn free(ptr: *mut c_void);
}
